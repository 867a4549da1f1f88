//! Positional route arguments.
//!
//! Every request payload has the same shape: passwords in `PWArgs`,
//! everything else as strings in `args`. The parsers here check the counts
//! for one route and turn the strings into typed forms.

use std::collections::HashMap;

use {secrecy::SecretString, serde::Deserialize};

use crate::core::{AssetId, RegisterForm, TradeForm, WalletForm};

/// Request parameters as they arrive on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct RawParams {
    #[serde(rename = "PWArgs", default)]
    pub pw_args: Vec<SecretString>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("expected {expected} password argument(s), got {got}")]
    PasswordCount { expected: usize, got: usize },
    #[error("expected {min} to {max} argument(s), got {got}")]
    ArgCount { min: usize, max: usize, got: usize },
    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

fn check_counts(
    params: &RawParams,
    passwords: usize,
    min: usize,
    max: usize,
) -> Result<(), ArgsError> {
    if params.pw_args.len() != passwords {
        return Err(ArgsError::PasswordCount {
            expected: passwords,
            got: params.pw_args.len(),
        });
    }
    let got = params.args.len();
    if got < min || got > max {
        return Err(ArgsError::ArgCount { min, max, got });
    }
    Ok(())
}

fn invalid(name: &'static str, value: &str) -> ArgsError {
    ArgsError::Invalid {
        name,
        value: value.to_string(),
    }
}

fn parse_asset(name: &'static str, value: &str) -> Result<AssetId, ArgsError> {
    value.parse().map_err(|_| invalid(name, value))
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ArgsError> {
    value.parse().map_err(|_| invalid(name, value))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ArgsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

/// Split a params value into its passwords and plain arguments.
fn take(params: RawParams) -> (std::vec::IntoIter<SecretString>, std::vec::IntoIter<String>) {
    (params.pw_args.into_iter(), params.args.into_iter())
}

// The counts are validated before `take`, so the `next()` calls below cannot
// come up short; they still return errors instead of panicking.
fn next_pw(pws: &mut std::vec::IntoIter<SecretString>) -> Result<SecretString, ArgsError> {
    pws.next().ok_or(ArgsError::PasswordCount {
        expected: 1,
        got: 0,
    })
}

fn next_arg(args: &mut std::vec::IntoIter<String>, name: &'static str) -> Result<String, ArgsError> {
    args.next().ok_or_else(|| invalid(name, ""))
}

// ── Per-route parsers ────────────────────────────────────────────────────────

/// `help [route]`
pub fn parse_help_args(params: RawParams) -> Result<Option<String>, ArgsError> {
    check_counts(&params, 0, 0, 1)?;
    Ok(params.args.into_iter().next())
}

/// `init appPass [seedHex]`
pub fn parse_init_args(
    params: RawParams,
) -> Result<(SecretString, Option<Vec<u8>>), ArgsError> {
    check_counts(&params, 1, 0, 1)?;
    let (mut pws, mut args) = take(params);
    let seed = args
        .next()
        .map(|s| hex::decode(&s).map_err(|_| invalid("seed", "<redacted>")))
        .transpose()?;
    Ok((next_pw(&mut pws)?, seed))
}

/// Routes taking only the app password: `login`, `exportseed`.
pub fn parse_app_pass(params: RawParams) -> Result<SecretString, ArgsError> {
    check_counts(&params, 1, 0, 0)?;
    let (mut pws, _) = take(params);
    next_pw(&mut pws)
}

/// Routes taking one asset ID: `closewallet`, `walletstate`, `balance`.
pub fn parse_asset_arg(params: RawParams) -> Result<AssetId, ArgsError> {
    check_counts(&params, 0, 1, 1)?;
    let (_, mut args) = take(params);
    parse_asset("assetID", &next_arg(&mut args, "assetID")?)
}

/// `getfee host [cert]`
pub fn parse_getfee_args(params: RawParams) -> Result<(String, Option<String>), ArgsError> {
    check_counts(&params, 0, 1, 2)?;
    let (_, mut args) = take(params);
    let host = next_arg(&mut args, "host")?;
    Ok((host, args.next()))
}

/// `register appPass host fee [cert]`
pub fn parse_register_args(params: RawParams) -> Result<RegisterForm, ArgsError> {
    check_counts(&params, 1, 2, 3)?;
    let (mut pws, mut args) = take(params);
    let addr = next_arg(&mut args, "host")?;
    let fee = parse_u64("fee", &next_arg(&mut args, "fee")?)?;
    Ok(RegisterForm {
        addr,
        app_pass: next_pw(&mut pws)?,
        fee,
        cert: args.next(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookArgs {
    pub host: String,
    pub base: AssetId,
    pub quote: AssetId,
    pub n_orders: Option<usize>,
}

/// `orderbook host base quote [nOrders]`
pub fn parse_orderbook_args(params: RawParams) -> Result<OrderBookArgs, ArgsError> {
    check_counts(&params, 0, 3, 4)?;
    let (_, mut args) = take(params);
    let host = next_arg(&mut args, "host")?;
    let base = parse_asset("base", &next_arg(&mut args, "base")?)?;
    let quote = parse_asset("quote", &next_arg(&mut args, "quote")?)?;
    let n_orders = args
        .next()
        .map(|n| n.parse::<usize>().map_err(|_| invalid("nOrders", &n)))
        .transpose()?;
    Ok(OrderBookArgs {
        host,
        base,
        quote,
        n_orders,
    })
}

/// `trade appPass host isLimit sell base quote qty rate tifNow`
pub fn parse_trade_args(params: RawParams) -> Result<(SecretString, TradeForm), ArgsError> {
    check_counts(&params, 1, 8, 8)?;
    let (mut pws, mut args) = take(params);
    let host = next_arg(&mut args, "host")?;
    let is_limit = parse_bool("isLimit", &next_arg(&mut args, "isLimit")?)?;
    let sell = parse_bool("sell", &next_arg(&mut args, "sell")?)?;
    let base = parse_asset("base", &next_arg(&mut args, "base")?)?;
    let quote = parse_asset("quote", &next_arg(&mut args, "quote")?)?;
    let qty = parse_u64("qty", &next_arg(&mut args, "qty")?)?;
    let rate = parse_u64("rate", &next_arg(&mut args, "rate")?)?;
    let tif_now = parse_bool("tifNow", &next_arg(&mut args, "tifNow")?)?;
    if qty == 0 {
        return Err(invalid("qty", "0"));
    }
    if is_limit && rate == 0 {
        return Err(invalid("rate", "0"));
    }
    Ok((next_pw(&mut pws)?, TradeForm {
        host,
        is_limit,
        sell,
        base,
        quote,
        qty,
        rate,
        tif_now,
    }))
}

/// `cancel appPass orderID`
pub fn parse_cancel_args(params: RawParams) -> Result<(SecretString, Vec<u8>), ArgsError> {
    check_counts(&params, 1, 1, 1)?;
    let (mut pws, mut args) = take(params);
    let id = next_arg(&mut args, "orderID")?;
    let order_id = hex::decode(&id).map_err(|_| invalid("orderID", &id))?;
    if order_id.len() != 32 {
        return Err(invalid("orderID", &id));
    }
    Ok((next_pw(&mut pws)?, order_id))
}

/// `newwallet appPass walletPass assetID [settingsJSON]`
pub fn parse_newwallet_args(
    params: RawParams,
) -> Result<(SecretString, SecretString, WalletForm), ArgsError> {
    check_counts(&params, 2, 1, 2)?;
    let (mut pws, mut args) = take(params);
    let asset_id = parse_asset("assetID", &next_arg(&mut args, "assetID")?)?;
    let config = match args.next() {
        Some(raw) => serde_json::from_str::<HashMap<String, String>>(&raw)
            .map_err(|_| invalid("settings", &raw))?,
        None => HashMap::new(),
    };
    let app_pass = next_pw(&mut pws)?;
    let wallet_pass = next_pw(&mut pws)?;
    Ok((app_pass, wallet_pass, WalletForm { asset_id, config }))
}

/// `openwallet appPass assetID`
pub fn parse_openwallet_args(params: RawParams) -> Result<(SecretString, AssetId), ArgsError> {
    check_counts(&params, 1, 1, 1)?;
    let (mut pws, mut args) = take(params);
    let asset_id = parse_asset("assetID", &next_arg(&mut args, "assetID")?)?;
    Ok((next_pw(&mut pws)?, asset_id))
}

#[derive(Debug)]
pub struct WithdrawArgs {
    pub app_pass: SecretString,
    pub asset_id: AssetId,
    pub value: u64,
    pub address: String,
}

/// `withdraw appPass assetID value address`
pub fn parse_withdraw_args(params: RawParams) -> Result<WithdrawArgs, ArgsError> {
    check_counts(&params, 1, 3, 3)?;
    let (mut pws, mut args) = take(params);
    let asset_id = parse_asset("assetID", &next_arg(&mut args, "assetID")?)?;
    let value = parse_u64("value", &next_arg(&mut args, "value")?)?;
    let address = next_arg(&mut args, "address")?;
    if value == 0 {
        return Err(invalid("value", "0"));
    }
    Ok(WithdrawArgs {
        app_pass: next_pw(&mut pws)?,
        asset_id,
        value,
        address,
    })
}
