//! Built-in demo tools.
//!
//! The lookups are plain functions so they can be tested without a runner;
//! the `*_tool` constructors wrap them for registration on an agent.

use std::sync::Arc;

use agent_sessions_core::StateKey;
use serde_json::json;

use crate::{FnTool, ParamKind, ParamSpec, RunnerError, Tool, ToolOutcome, ToolSpec};

const FEES: &[(&str, f64)] = &[
    ("platinum credit card", 0.02),
    ("gold debit card", 0.035),
    ("bank transfer", 0.01),
];

const RATES: &[(&str, &str, f64)] = &[
    ("usd", "eur", 0.93),
    ("usd", "jpy", 157.50),
    ("usd", "inr", 83.58),
];

const CATALOG: &[(&str, &str)] = &[
    ("iphone 15 pro", "iPhone 15 Pro, $999, Low Stock (8 units), 128GB, Titanium finish"),
    ("samsung galaxy s24", "Samsung Galaxy S24, $799, In Stock (31 units), 256GB, Phantom Black"),
    ("dell xps 15", "Dell XPS 15, $1,299, In Stock (45 units), 15.6\" display, 16GB RAM, 512GB SSD"),
    ("macbook pro 14", "MacBook Pro 14\", $1,999, In Stock (22 units), M3 Pro chip, 18GB RAM, 512GB SSD"),
    ("sony wh-1000xm5", "Sony WH-1000XM5 Headphones, $399, In Stock (67 units), Noise-canceling, 30hr battery"),
    ("ipad air", "iPad Air, $599, In Stock (28 units), 10.9\" display, 64GB"),
    ("lg ultrawide 34", "LG UltraWide 34\" Monitor, $499, Out of Stock, Expected: Next week"),
];

/// Transaction fee for a payment method, matched case-insensitively.
#[must_use]
pub fn fee_for_payment_method(method: &str) -> ToolOutcome {
    let wanted = method.to_lowercase();
    FEES.iter().find(|(name, _)| *name == wanted).map_or_else(
        || ToolOutcome::error(format!("Payment method '{method}' not found")),
        |(_, fee)| ToolOutcome::success(json!({ "fee_percentage": fee })),
    )
}

/// Exchange rate between two currencies, matched case-insensitively.
#[must_use]
pub fn exchange_rate(base_currency: &str, target_currency: &str) -> ToolOutcome {
    let base = base_currency.to_lowercase();
    let target = target_currency.to_lowercase();
    RATES
        .iter()
        .find(|(b, t, _)| *b == base && *t == target)
        .map_or_else(
            || {
                ToolOutcome::error(format!(
                    "Unsupported currency pair: {base_currency}/{target_currency}"
                ))
            },
            |(_, _, rate)| ToolOutcome::success(json!({ "rate": rate })),
        )
}

/// Catalog entry for a product name, ignoring case and surrounding space.
#[must_use]
pub fn product_info(product_name: &str) -> ToolOutcome {
    let wanted = product_name.trim().to_lowercase();
    if let Some((_, info)) = CATALOG.iter().find(|(name, _)| *name == wanted) {
        return ToolOutcome::success(json!({ "result": format!("Product: {info}") }));
    }
    let available = CATALOG
        .iter()
        .map(|(name, _)| title_case(name))
        .collect::<Vec<_>>()
        .join(", ");
    ToolOutcome::error(format!(
        "Sorry, no info for {product_name}. Available products: {available}"
    ))
}

/// Number of entries in a list of papers.
#[must_use]
pub fn count_papers(papers: &[&str]) -> ToolOutcome {
    tracing::info!(count = papers.len(), "count_papers received items");
    ToolOutcome::success(json!({ "count": papers.len() }))
}

/// Uppercase every letter that follows a non-letter.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() && !prev_alpha {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

#[must_use]
pub fn fee_lookup_tool() -> Arc<dyn Tool> {
    let spec = ToolSpec::new(
        "get_fee_for_payment_method",
        "Looks up the transaction fee percentage for a given payment method.",
    )
    .param(ParamSpec::required("method", ParamKind::String, "Payment method name"));
    Arc::new(FnTool::new(spec, |args, _ctx| async move {
        Ok(fee_for_payment_method(args.str("method").unwrap_or_default()))
    }))
}

#[must_use]
pub fn exchange_rate_tool() -> Arc<dyn Tool> {
    let spec = ToolSpec::new(
        "get_exchange_rate",
        "Looks up and returns the exchange rate between two currencies.",
    )
    .param(ParamSpec::required("base_currency", ParamKind::String, "ISO code to convert from"))
    .param(ParamSpec::required("target_currency", ParamKind::String, "ISO code to convert to"));
    Arc::new(FnTool::new(spec, |args, _ctx| async move {
        Ok(exchange_rate(
            args.str("base_currency").unwrap_or_default(),
            args.str("target_currency").unwrap_or_default(),
        ))
    }))
}

/// Stores `user:name` and `user:country`, visible to every session of the user.
#[must_use]
pub fn save_userinfo_tool() -> Arc<dyn Tool> {
    let spec = ToolSpec::new(
        "save_userinfo",
        "Saves the user's name and country to the session state.",
    )
    .param(ParamSpec::required("user_name", ParamKind::String, "The user's name"))
    .param(ParamSpec::required("country", ParamKind::String, "The user's country"));
    Arc::new(FnTool::new(spec, |args, ctx| async move {
        let user_name = args.str("user_name").unwrap_or_default().to_string();
        let country = args.str("country").unwrap_or_default().to_string();
        tracing::info!(%user_name, %country, "saving user info");
        ctx.set(&StateKey::user("name"), user_name.clone()).await?;
        ctx.set(&StateKey::user("country"), country.clone()).await?;
        Ok::<_, RunnerError>(ToolOutcome::success(
            json!({ "user_name": user_name, "country": country }),
        ))
    }))
}

#[must_use]
pub fn retrieve_userinfo_tool() -> Arc<dyn Tool> {
    let spec = ToolSpec::new(
        "retrieve_userinfo",
        "Retrieves the user's name and country from the session state.",
    );
    Arc::new(FnTool::new(spec, |_args, ctx| async move {
        let user_name = ctx.get_or(&StateKey::user("name"), "Username not found").await?;
        let country = ctx.get_or(&StateKey::user("country"), "Country not found").await?;
        Ok::<_, RunnerError>(ToolOutcome::success(
            json!({ "user_name": user_name, "country": country }),
        ))
    }))
}

#[must_use]
pub fn count_papers_tool() -> Arc<dyn Tool> {
    let spec = ToolSpec::new("count_papers", "Counts the number of papers in a list of strings.")
        .param(ParamSpec::required("papers", ParamKind::StringList, "One entry per paper"));
    Arc::new(FnTool::new(spec, |args, _ctx| async move {
        Ok(count_papers(&args.string_list("papers").unwrap_or_default()))
    }))
}

#[must_use]
pub fn product_info_tool() -> Arc<dyn Tool> {
    let spec = ToolSpec::new("get_product_info", "Provides product info from vendor catalog.")
        .param(ParamSpec::required("product_name", ParamKind::String, "Product to look up"));
    Arc::new(FnTool::new(spec, |args, _ctx| async move {
        Ok(product_info(args.str("product_name").unwrap_or_default()))
    }))
}
