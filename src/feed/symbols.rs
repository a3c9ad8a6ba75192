//! Symbol normalization between venue-native and canonical forms
//!
//! Native forms differ per venue: Binance `BTCUSDT`, CEX.IO `BTC:USD`,
//! Gate.io `BTC_USDT`. All three canonicalize to `BTCUSDT`.

use crate::types::{CanonicalSymbol, Venue};

const SEPARATORS: [char; 4] = [':', '_', '-', '/'];

/// Quote currencies folded together when canonicalizing (alias, canonical)
const QUOTE_ALIASES: &[(&str, &str)] = &[("USD", "USDT")];

/// Quote currencies recognised when splitting a canonical symbol, longest first
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "BTC", "ETH", "EUR", "USD"];

/// CEX.IO lists dollar pairs against USD
const CEX_QUOTE_ALIASES: &[(&str, &str)] = &[("USDT", "USD")];

fn alias<'a>(table: &[(&'a str, &'a str)], quote: &'a str) -> &'a str {
    table
        .iter()
        .find(|(from, _)| *from == quote)
        .map(|(_, to)| *to)
        .unwrap_or(quote)
}

fn strip(part: &str) -> String {
    part.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Map a venue-native symbol to its canonical form.
///
/// Pure, total and idempotent. Separated symbols are split into base and quote
/// and the quote goes through the alias table; unseparated symbols are only
/// upper-cased.
pub fn canonicalize(native: &str) -> CanonicalSymbol {
    let upper = native.trim().to_uppercase();

    let normalized = match upper.split_once(|c| SEPARATORS.contains(&c)) {
        Some((base, quote)) => {
            let quote = strip(quote);
            format!("{}{}", strip(base), alias(QUOTE_ALIASES, &quote))
        }
        None => strip(&upper),
    };

    CanonicalSymbol::from_normalized(normalized)
}

/// Split a canonical symbol into (base, quote) by longest known quote suffix
pub fn split_base_quote(symbol: &CanonicalSymbol) -> Option<(&str, &str)> {
    let s = symbol.as_str();
    KNOWN_QUOTES.iter().find_map(|quote| {
        s.strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *quote))
    })
}

/// Render a canonical symbol in a venue's native syntax.
///
/// Symbols without a recognised quote are passed through unchanged.
pub fn to_native(venue: Venue, symbol: &CanonicalSymbol) -> String {
    let Some((base, quote)) = split_base_quote(symbol) else {
        return symbol.as_str().to_string();
    };

    match venue {
        Venue::Binance => format!("{}{}", base, quote),
        Venue::Gate => format!("{}_{}", base, quote),
        Venue::Cex => format!("{}:{}", base, alias(CEX_QUOTE_ALIASES, quote)),
    }
}
