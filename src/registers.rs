//! Control register names, loaded from the register map shipped with the crate.
use serde::{Deserialize, Serialize};

use crate::constants::MAX_CONTROL_REGISTER;
use crate::error::{RegisterKind, Result, ValidationError};

/// One system control register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRegister {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(deserialize_with = "parse_encoding")]
    pub encoding: u16,
}

impl ::std::fmt::Display for ControlRegister {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "{}(0x{:03x})", self.name, self.encoding)
    }
}

/// Control registers of one processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMap {
    pub name: String,
    pub description: String,
    pub registers: Vec<ControlRegister>,
}

impl RegisterMap {
    pub fn load() -> Result<Self> {
        Ok(serde_yaml::from_str(include_str!(
            "../registers/mcf5307.yaml"
        ))?)
    }

    /// Case-insensitive lookup by name or alias.
    pub fn find(&self, name: &str) -> Option<&ControlRegister> {
        self.registers.iter().find(|r| {
            r.name.eq_ignore_ascii_case(name)
                || r.alias
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(name))
        })
    }

    /// Resolve a name or a numeric `Rc` encoding.
    pub fn encoding(&self, name: &str) -> Result<u16> {
        if let Some(reg) = self.find(name) {
            return Ok(reg.encoding);
        }
        match parse_number(name) {
            Some(n) if n <= MAX_CONTROL_REGISTER as u32 => Ok(n as u16),
            Some(n) => Err(ValidationError::ControlRegister(n).into()),
            None => Err(ValidationError::Argument(format!(
                "unknown control register {:?}",
                name
            ))
            .into()),
        }
    }
}

/// Anything `reg` can name on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterName {
    General(RegisterKind, u8),
    Csr,
    Control(u16),
}

impl RegisterName {
    /// `A0`-`A7`, `D0`-`D7`, `SP`, `CSR`, or a control register.
    pub fn parse(map: &RegisterMap, name: &str) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        if upper == "CSR" {
            return Ok(RegisterName::Csr);
        }
        if upper == "SP" {
            return Ok(RegisterName::General(RegisterKind::Address, 7));
        }
        let general = match upper.split_at_checked(1) {
            Some(("A", n)) => n.parse().ok().map(|n| (RegisterKind::Address, n)),
            Some(("D", n)) => n.parse().ok().map(|n| (RegisterKind::Data, n)),
            _ => None,
        };
        if let Some((kind, index)) = general {
            return Ok(RegisterName::General(kind, index));
        }
        map.encoding(name).map(RegisterName::Control)
    }
}

/// Parse `0x`-prefixed hex, `0b` binary or decimal.
pub fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim().replace('_', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = s.strip_prefix("0b") {
        u32::from_str_radix(bin, 2).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_encoding<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_number(&s)
        .filter(|&n| n <= MAX_CONTROL_REGISTER as u32)
        .map(|n| n as u16)
        .ok_or_else(|| serde::de::Error::custom(format!("bad register encoding {:?}", s)))
}

impl ::std::fmt::Display for RegisterName {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self {
            RegisterName::General(RegisterKind::Address, n) => write!(f, "A{}", n),
            RegisterName::General(RegisterKind::Data, n) => write!(f, "D{}", n),
            RegisterName::Csr => write!(f, "CSR"),
            RegisterName::Control(enc) => write!(f, "Rc 0x{:03x}", enc),
        }
    }
}
