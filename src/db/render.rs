//! Text rendering of raw wire values
//!
//! [`Rendered`] accepts every PostgreSQL type and turns its binary wire
//! value into the text PostgreSQL itself would print. It covers what the
//! typed decoders cannot carry: `numeric` of any precision including NaN
//! and infinities, `interval`, `timetz`, `money`, network addresses, OID
//! aliases, enums and infinite timestamps. Any other type becomes
//! `\x`-prefixed hex of the raw bytes, so no value is ever dropped.

use std::error::Error;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio_postgres::types::{FromSql, Kind, Type};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

const USECS_PER_SEC: u64 = 1_000_000;
const USECS_PER_MINUTE: u64 = 60 * USECS_PER_SEC;
const USECS_PER_HOUR: u64 = 60 * USECS_PER_MINUTE;

/// A non-null value rendered as text, whatever its column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered(pub String);

impl<'a> FromSql<'a> for Rendered {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Rendered(render(ty, raw)))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Text for one non-null wire value of type `ty`
pub fn render(ty: &Type, raw: &[u8]) -> String {
    decode(ty, raw).unwrap_or_else(|| hex(raw))
}

/// Hex-encode binary data (e.g. `\xdeadbeef`)
pub fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("\\x");
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn decode(ty: &Type, raw: &[u8]) -> Option<String> {
    match ty.kind() {
        Kind::Enum(_) => return utf8(raw),
        Kind::Domain(base) => return decode(base, raw),
        _ => {}
    }
    match *ty {
        Type::NUMERIC => numeric(raw),
        Type::INTERVAL => interval(raw),
        Type::TIMETZ => timetz(raw),
        Type::MONEY => money(raw),
        Type::INET | Type::CIDR => inet(raw),
        Type::MACADDR | Type::MACADDR8 => macaddr(raw),
        Type::OID | Type::XID | Type::CID | Type::REGPROC | Type::REGCLASS | Type::REGTYPE => {
            Some(u32::from_be_bytes(raw.try_into().ok()?).to_string())
        }
        Type::TIMESTAMP | Type::TIMESTAMPTZ => match i64::from_be_bytes(raw.try_into().ok()?) {
            i64::MAX => Some("infinity".to_string()),
            i64::MIN => Some("-infinity".to_string()),
            _ => None,
        },
        Type::DATE => match i32::from_be_bytes(raw.try_into().ok()?) {
            i32::MAX => Some("infinity".to_string()),
            i32::MIN => Some("-infinity".to_string()),
            _ => None,
        },
        Type::JSONB => match raw.split_first() {
            Some((1, text)) => utf8(text),
            _ => None,
        },
        Type::TEXT
        | Type::VARCHAR
        | Type::BPCHAR
        | Type::NAME
        | Type::CHAR
        | Type::UNKNOWN
        | Type::XML
        | Type::JSON => utf8(raw),
        _ if ty.name() == "citext" => utf8(raw),
        _ => None,
    }
}

/// Big-endian cursor over a wire value
struct Wire<'a>(&'a [u8]);

impl Wire<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.0.split_first_chunk::<N>()?;
        self.0 = rest;
        Some(*head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn i16(&mut self) -> Option<i16> {
        self.take().map(i16::from_be_bytes)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take().map(u16::from_be_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_be_bytes)
    }

    fn i64(&mut self) -> Option<i64> {
        self.take().map(i64::from_be_bytes)
    }
}

fn utf8(raw: &[u8]) -> Option<String> {
    std::str::from_utf8(raw).ok().map(str::to_string)
}

/// `numeric`: base-10000 digit groups, `weight` being the power of the
/// first group, printed with exactly `dscale` fractional digits
fn numeric(raw: &[u8]) -> Option<String> {
    let mut wire = Wire(raw);
    let ndigits = usize::try_from(wire.i16()?).ok()?;
    let weight = i32::from(wire.i16()?);
    let sign = wire.u16()?;
    let dscale = usize::from(wire.u16()?);
    let digits = (0..ndigits)
        .map(|_| wire.i16())
        .collect::<Option<Vec<i16>>>()?;
    let digit = |k: i32| {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k))
            .copied()
            .unwrap_or(0)
    };

    let mut out = String::new();
    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        NUMERIC_NEG => out.push('-'),
        NUMERIC_POS => {}
        _ => return None,
    }

    if weight < 0 {
        out.push('0');
    } else {
        write!(out, "{}", digit(0)).ok()?;
        for k in 1..=weight {
            write!(out, "{:04}", digit(k)).ok()?;
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit(k)).ok()?;
            k += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

/// `HH:MM:SS[.ffffff]` with trailing fractional zeros dropped
fn clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let us = micros.unsigned_abs();
    let mut out = format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        us / USECS_PER_HOUR,
        us % USECS_PER_HOUR / USECS_PER_MINUTE,
        us % USECS_PER_MINUTE / USECS_PER_SEC
    );
    let fraction = us % USECS_PER_SEC;
    if fraction != 0 {
        let digits = format!("{:06}", fraction);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

/// `interval` in the server's default `postgres` style
fn interval(raw: &[u8]) -> Option<String> {
    let mut wire = Wire(raw);
    let micros = wire.i64()?;
    let days = wire.i32()?;
    let months = wire.i32()?;

    let (years, mons) = (months / 12, months % 12);
    let mut parts = Vec::new();
    for (n, unit) in [(years, "year"), (mons, "mon"), (days, "day")] {
        if n != 0 {
            parts.push(format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" }));
        }
    }
    if micros != 0 || parts.is_empty() {
        let negative_before = years < 0 || mons < 0 || days < 0;
        let sign = if micros > 0 && negative_before { "+" } else { "" };
        parts.push(format!("{}{}", sign, clock(micros)));
    }
    Some(parts.join(" "))
}

/// `timetz`: time of day plus a zone stored as seconds west of UTC
fn timetz(raw: &[u8]) -> Option<String> {
    let mut wire = Wire(raw);
    let micros = wire.i64()?;
    let east = -i64::from(wire.i32()?);

    let mut out = clock(micros);
    let secs = east.unsigned_abs();
    let sign = if east < 0 { '-' } else { '+' };
    write!(out, "{}{:02}", sign, secs / 3600).ok()?;
    let (minutes, seconds) = (secs % 3600 / 60, secs % 60);
    if minutes != 0 || seconds != 0 {
        write!(out, ":{:02}", minutes).ok()?;
    }
    if seconds != 0 {
        write!(out, ":{:02}", seconds).ok()?;
    }
    Some(out)
}

/// `money` is an integer count of minor units; rendered with two decimals
/// and without the locale's currency symbol
fn money(raw: &[u8]) -> Option<String> {
    let units = i64::from_be_bytes(raw.try_into().ok()?);
    let sign = if units < 0 { "-" } else { "" };
    let abs = units.unsigned_abs();
    Some(format!("{}{}.{:02}", sign, abs / 100, abs % 100))
}

/// `inet` / `cidr`; the prefix length is shown for `cidr` and for
/// host addresses with a non-default netmask
fn inet(raw: &[u8]) -> Option<String> {
    let mut wire = Wire(raw);
    let family = wire.u8()?;
    let bits = wire.u8()?;
    let is_cidr = wire.u8()? != 0;
    let len = wire.u8()?;

    let (addr, max_bits) = match (family, len) {
        (PGSQL_AF_INET, 4) => (Ipv4Addr::from(wire.take::<4>()?).to_string(), 32),
        (PGSQL_AF_INET6, 16) => (Ipv6Addr::from(wire.take::<16>()?).to_string(), 128),
        _ => return None,
    };
    if is_cidr || bits != max_bits {
        Some(format!("{}/{}", addr, bits))
    } else {
        Some(addr)
    }
}

fn macaddr(raw: &[u8]) -> Option<String> {
    if raw.len() != 6 && raw.len() != 8 {
        return None;
    }
    Some(
        raw.iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
