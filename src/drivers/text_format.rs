//! Binary-format cells rendered the way the server's text output functions
//! print them, assuming the default `DateStyle` (ISO) and `IntervalStyle`
//! (postgres) settings.

use std::error::Error;
use std::fmt::{self, Write};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use fallible_iterator::FallibleIterator;
use postgres_protocol::types::{self as wire, ArrayDimension};
use tokio_postgres::types::{Kind, Type};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum RenderError {
    #[error("unsupported type {0}")]
    Unsupported(String),
    #[error(transparent)]
    Malformed(#[from] BoxError),
}

type Rendered = std::result::Result<String, RenderError>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_HOUR: i64 = 3_600 * MICROS_PER_SECOND;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;

// Significant digits before float output switches to exponent notation.
const FLOAT4_DIGITS: i32 = 6;
const FLOAT8_DIGITS: i32 = 15;

pub(crate) fn render(ty: &Type, raw: &[u8]) -> Rendered {
    match ty.kind() {
        Kind::Enum(_) => Ok(wire::text_from_sql(raw)?.to_string()),
        Kind::Domain(base) => render(base, raw),
        Kind::Array(element) => array(element, raw),
        Kind::Simple => simple(ty, raw),
        _ => Err(RenderError::Unsupported(ty.name().to_string())),
    }
}

fn simple(ty: &Type, raw: &[u8]) -> Rendered {
    let text = match *ty {
        Type::BOOL => (if wire::bool_from_sql(raw)? { "t" } else { "f" }).to_string(),
        Type::INT2 => wire::int2_from_sql(raw)?.to_string(),
        Type::INT4 => wire::int4_from_sql(raw)?.to_string(),
        Type::INT8 => wire::int8_from_sql(raw)?.to_string(),
        Type::OID => wire::oid_from_sql(raw)?.to_string(),
        Type::FLOAT4 => {
            let v = wire::float4_from_sql(raw)?;
            float(v, v.is_nan(), v.is_infinite(), v.is_sign_negative(), FLOAT4_DIGITS)
        }
        Type::FLOAT8 => {
            let v = wire::float8_from_sql(raw)?;
            float(v, v.is_nan(), v.is_infinite(), v.is_sign_negative(), FLOAT8_DIGITS)
        }
        Type::NUMERIC => numeric(raw)?,
        Type::CHAR => char::from(wire::char_from_sql(raw)? as u8).to_string(),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML => {
            wire::text_from_sql(raw)?.to_string()
        }
        // The server sends JSON as its text, so the document keeps its key order and spacing.
        Type::JSON => wire::text_from_sql(raw)?.to_string(),
        Type::JSONB => match raw.split_first() {
            Some((1, document)) => wire::text_from_sql(document)?.to_string(),
            _ => return Err(malformed("unsupported jsonb version")),
        },
        Type::BYTEA => bytea(wire::bytea_from_sql(raw)),
        Type::UUID => Uuid::from_bytes(wire::uuid_from_sql(raw)?).to_string(),
        Type::DATE => date(wire::date_from_sql(raw)?)?,
        Type::TIME => time_of_day(wire::time_from_sql(raw)?),
        Type::TIMETZ => time_with_zone(raw)?,
        Type::TIMESTAMP => timestamp(wire::timestamp_from_sql(raw)?, "")?,
        Type::TIMESTAMPTZ => timestamp(wire::timestamp_from_sql(raw)?, "+00")?,
        Type::INTERVAL => interval(raw)?,
        Type::INET | Type::CIDR => {
            let inet = wire::inet_from_sql(raw)?;
            let full = if inet.addr().is_ipv4() { 32 } else { 128 };
            if *ty == Type::INET && inet.netmask() == full {
                inet.addr().to_string()
            } else {
                format!("{}/{}", inet.addr(), inet.netmask())
            }
        }
        _ => return Err(RenderError::Unsupported(ty.name().to_string())),
    };
    Ok(text)
}

fn malformed(message: &str) -> RenderError {
    RenderError::Malformed(message.into())
}

fn float<T: fmt::Display + fmt::LowerExp>(
    value: T,
    nan: bool,
    infinite: bool,
    negative: bool,
    digits: i32,
) -> String {
    if nan {
        return "NaN".to_string();
    }
    if infinite {
        return if negative { "-Infinity" } else { "Infinity" }.to_string();
    }
    let scientific = format!("{:e}", value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return value.to_string();
    };
    match exponent.parse::<i32>() {
        Ok(exponent) if exponent < -4 || exponent >= digits => {
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        _ => value.to_string(),
    }
}

/// NUMERIC is a sign, a weight and base-10000 digits; `dscale` fixes the number
/// of decimal places printed.
fn numeric(raw: &[u8]) -> std::result::Result<String, RenderError> {
    let header = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    if raw.len() < 8 {
        return Err(malformed("numeric value too short"));
    }
    let ndigits = usize::from(header(0));
    let weight = header(2) as i16 as i64;
    let sign = header(4);
    let dscale = usize::from(header(6));
    if raw.len() < 8 + ndigits * 2 {
        return Err(malformed("numeric value truncated"));
    }

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        _ => return Err(malformed("invalid numeric sign")),
    }

    let digit = |group: i64| -> u16 {
        if group < 0 || group >= ndigits as i64 {
            0
        } else {
            let at = 8 + group as usize * 2;
            u16::from_be_bytes([raw[at], raw[at + 1]])
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && ndigits > 0 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit(0));
        for group in 1..=weight {
            let _ = write!(out, "{:04}", digit(group));
        }
    }
    if dscale > 0 {
        out.push('.');
        let mut group = weight + 1;
        let mut written = 0;
        while written < dscale {
            let chunk = format!("{:04}", digit(group));
            for c in chunk.chars().take(dscale - written) {
                out.push(c);
                written += 1;
            }
            group += 1;
        }
    }
    Ok(out)
}

fn bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

fn epoch() -> std::result::Result<NaiveDateTime, RenderError> {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| malformed("invalid epoch"))
}

/// ISO date, plus whether it falls before year 1.
fn ymd(date: NaiveDate) -> (String, bool) {
    let year = date.year();
    let bc = year <= 0;
    let shown = if bc { 1 - year } else { year };
    (format!("{:04}-{:02}-{:02}", shown, date.month(), date.day()), bc)
}

fn date(days: i32) -> std::result::Result<String, RenderError> {
    match days {
        i32::MAX => return Ok("infinity".to_string()),
        i32::MIN => return Ok("-infinity".to_string()),
        _ => {}
    }
    let date = epoch()?
        .date()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| malformed("date out of range"))?;
    let (text, bc) = ymd(date);
    Ok(if bc { text + " BC" } else { text })
}

fn fraction(micros: i64) -> String {
    if micros == 0 {
        return String::new();
    }
    let digits = format!(".{:06}", micros);
    digits.trim_end_matches('0').to_string()
}

fn time_of_day(micros: i64) -> String {
    let (hours, rest) = (micros / MICROS_PER_HOUR, micros % MICROS_PER_HOUR);
    let (minutes, rest) = (rest / MICROS_PER_MINUTE, rest % MICROS_PER_MINUTE);
    let (seconds, micros) = (rest / MICROS_PER_SECOND, rest % MICROS_PER_SECOND);
    format!("{:02}:{:02}:{:02}{}", hours, minutes, seconds, fraction(micros))
}

/// Zone offsets are sent in seconds west of UTC.
fn time_with_zone(raw: &[u8]) -> std::result::Result<String, RenderError> {
    if raw.len() != 12 {
        return Err(malformed("invalid timetz length"));
    }
    let micros = i64::from_be_bytes(raw[..8].try_into().map_err(|_| malformed("timetz"))?);
    let west = i32::from_be_bytes(raw[8..].try_into().map_err(|_| malformed("timetz"))?);
    Ok(time_of_day(micros) + &utc_offset(-west))
}

fn utc_offset(east: i32) -> String {
    let sign = if east < 0 { '-' } else { '+' };
    let east = east.abs();
    let (hours, minutes, seconds) = (east / 3600, east % 3600 / 60, east % 60);
    let mut out = format!("{}{:02}", sign, hours);
    if minutes != 0 || seconds != 0 {
        let _ = write!(out, ":{:02}", minutes);
    }
    if seconds != 0 {
        let _ = write!(out, ":{:02}", seconds);
    }
    out
}

/// `zone` is appended after the time of day; timestamptz values are printed in UTC.
fn timestamp(micros: i64, zone: &str) -> std::result::Result<String, RenderError> {
    match micros {
        i64::MAX => return Ok("infinity".to_string()),
        i64::MIN => return Ok("-infinity".to_string()),
        _ => {}
    }
    let at = epoch()?
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| malformed("timestamp out of range"))?;
    let (date, bc) = ymd(at.date());
    let of_day = i64::from(at.num_seconds_from_midnight()) * MICROS_PER_SECOND
        + i64::from(at.nanosecond() / 1_000);
    let mut out = format!("{} {}{}", date, time_of_day(of_day), zone);
    if bc {
        out.push_str(" BC");
    }
    Ok(out)
}

fn interval(raw: &[u8]) -> std::result::Result<String, RenderError> {
    if raw.len() != 16 {
        return Err(malformed("invalid interval length"));
    }
    let micros = i64::from_be_bytes(raw[..8].try_into().map_err(|_| malformed("interval"))?);
    let days = i32::from_be_bytes(raw[8..12].try_into().map_err(|_| malformed("interval"))?);
    let months = i32::from_be_bytes(raw[12..].try_into().map_err(|_| malformed("interval"))?);

    let mut out = String::new();
    let mut is_zero = true;
    let mut is_before = false;
    for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if value == 0 {
            continue;
        }
        let space = if is_zero { "" } else { " " };
        let plus = if !is_zero && is_before && value > 0 { "+" } else { "" };
        let plural = if value != 1 { "s" } else { "" };
        let _ = write!(out, "{}{}{} {}{}", space, plus, value, unit, plural);
        is_before |= value < 0;
        is_zero = false;
    }
    if is_zero || micros != 0 {
        let space = if is_zero { "" } else { " " };
        let sign = if micros < 0 {
            "-"
        } else if is_before {
            "+"
        } else {
            ""
        };
        let _ = write!(out, "{}{}{}", space, sign, time_of_day(micros.abs()));
    }
    Ok(out)
}

fn array(element: &Type, raw: &[u8]) -> Rendered {
    let array = wire::array_from_sql(raw)?;
    let dimensions: Vec<ArrayDimension> = array.dimensions().collect()?;
    if dimensions.is_empty() {
        return Ok("{}".to_string());
    }
    let values: Vec<Option<&[u8]>> = array.values().collect()?;

    let mut out = String::new();
    if dimensions.iter().any(|d| d.lower_bound != 1) {
        for d in &dimensions {
            let _ = write!(out, "[{}:{}]", d.lower_bound, d.lower_bound + d.len - 1);
        }
        out.push('=');
    }
    let mut values = values.into_iter();
    write_array_level(&mut out, element, &dimensions, &mut values)?;
    Ok(out)
}

fn write_array_level<'a>(
    out: &mut String,
    element: &Type,
    dimensions: &[ArrayDimension],
    values: &mut impl Iterator<Item = Option<&'a [u8]>>,
) -> std::result::Result<(), RenderError> {
    let Some((outer, inner)) = dimensions.split_first() else {
        return Ok(());
    };
    out.push('{');
    for i in 0..outer.len {
        if i > 0 {
            out.push(',');
        }
        if !inner.is_empty() {
            write_array_level(out, element, inner, values)?;
            continue;
        }
        match values.next() {
            Some(Some(raw)) => push_array_element(out, &render(element, raw)?),
            Some(None) => out.push_str("NULL"),
            None => return Err(malformed("array has fewer elements than its dimensions")),
        }
    }
    out.push('}');
    Ok(())
}

fn push_array_element(out: &mut String, text: &str) {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text.chars().any(|c| {
            matches!(c, '{' | '}' | ',' | '"' | '\\' | ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
        });
    if !needs_quotes {
        out.push_str(text);
        return;
    }
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}
