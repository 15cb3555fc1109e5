use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetId {
    Esp32,
    Esp32s2,
    Esp32s3,
    Esp32c3,
    Esp32c6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchFamily {
    Xtensa,
    RiscV,
}

impl fmt::Display for ArchFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchFamily::Xtensa => "Xtensa",
            ArchFamily::RiscV => "RISC-V",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Target {
    pub id: TargetId,
    pub board: &'static str,
    pub arch: ArchFamily,
    pub cores: u8,
    pub ram_kib: u32,
    pub psram: bool,
    /// Extra low-power 802.15.4 radio next to WiFi/BLE.
    pub ieee802154: bool,
}

impl Target {
    pub fn description(&self) -> String {
        let cores = if self.cores > 1 {
            "Dual-core"
        } else {
            "Single-core"
        };
        let mut extras = String::new();
        if self.psram {
            extras.push_str(" + PSRAM");
        }
        if self.ieee802154 {
            extras.push_str(" + 802.15.4");
        }
        format!(
            "{} ({} {}, {}KB RAM{})",
            self.board, cores, self.arch, self.ram_kib, extras
        )
    }
}

const CATALOG: [Target; 5] = [
    Target {
        id: TargetId::Esp32,
        board: "ESP32 DevKit C",
        arch: ArchFamily::Xtensa,
        cores: 2,
        ram_kib: 520,
        psram: false,
        ieee802154: false,
    },
    Target {
        id: TargetId::Esp32s2,
        board: "ESP32-S2 Saola",
        arch: ArchFamily::Xtensa,
        cores: 1,
        ram_kib: 320,
        psram: false,
        ieee802154: false,
    },
    Target {
        id: TargetId::Esp32s3,
        board: "ESP32-S3 DevKitM",
        arch: ArchFamily::Xtensa,
        cores: 2,
        ram_kib: 512,
        psram: true,
        ieee802154: false,
    },
    Target {
        id: TargetId::Esp32c3,
        board: "ESP32-C3 DevKitM",
        arch: ArchFamily::RiscV,
        cores: 1,
        ram_kib: 400,
        psram: false,
        ieee802154: false,
    },
    Target {
        id: TargetId::Esp32c6,
        board: "ESP32-C6 DevKitC",
        arch: ArchFamily::RiscV,
        cores: 1,
        ram_kib: 512,
        psram: false,
        ieee802154: true,
    },
];

/// All supported targets in catalog order.
pub fn list_targets() -> &'static [Target] {
    &CATALOG
}

pub fn is_valid(identifier: &str) -> bool {
    TargetId::from_str(identifier).is_ok()
}

impl TargetId {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetId::Esp32 => "esp32",
            TargetId::Esp32s2 => "esp32s2",
            TargetId::Esp32s3 => "esp32s3",
            TargetId::Esp32c3 => "esp32c3",
            TargetId::Esp32c6 => "esp32c6",
        }
    }

    pub fn info(self) -> &'static Target {
        // Catalog order matches declaration order.
        &CATALOG[self as usize]
    }

    pub fn all() -> Vec<TargetId> {
        CATALOG.iter().map(|t| t.id).collect()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        CATALOG
            .iter()
            .map(|t| t.id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| {
                let known = CATALOG
                    .iter()
                    .map(|t| t.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Error::config(format!("invalid target '{s}' (known: {known})"))
            })
    }
}

/// Resolve CLI selector values (`esp32`, `esp32c3,esp32c6`, `all`) into an
/// ordered, de-duplicated target list. An empty selector means every target.
pub fn parse_selection(values: &[String]) -> Result<Vec<TargetId>> {
    let mut out: Vec<TargetId> = Vec::new();
    for raw in values {
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                for id in TargetId::all() {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
                continue;
            }
            let id = TargetId::from_str(part)?;
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    if out.is_empty() {
        return Ok(TargetId::all());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_five_targets_in_order() {
        let ids: Vec<&str> = list_targets().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["esp32", "esp32s2", "esp32s3", "esp32c3", "esp32c6"]);
        for t in list_targets() {
            assert_eq!(t.id.info(), t);
        }
    }

    #[test]
    fn catalog_core_mix() {
        let dual = list_targets().iter().filter(|t| t.cores == 2).count();
        let single = list_targets().iter().filter(|t| t.cores == 1).count();
        let radio = list_targets().iter().filter(|t| t.ieee802154).count();
        assert_eq!((dual, single, radio), (2, 3, 1));
    }

    #[test]
    fn validity_is_exact() {
        assert!(is_valid("esp32c6"));
        assert!(!is_valid("esp32c7"));
        assert!(!is_valid("ESP32"));
        assert!(!is_valid(""));
    }

    #[test]
    fn selection_expands_all_and_dedups() {
        let sel = parse_selection(&["esp32c3".into(), "all".into()]).expect("selection");
        assert_eq!(sel[0], TargetId::Esp32c3);
        assert_eq!(sel.len(), 5);

        let sel = parse_selection(&["esp32s3,esp32".into(), "esp32s3".into()]).expect("selection");
        assert_eq!(sel, vec![TargetId::Esp32s3, TargetId::Esp32]);

        assert_eq!(parse_selection(&[]).expect("empty"), TargetId::all());
        assert!(parse_selection(&["nrf52".into()]).is_err());
    }

    #[test]
    fn description_mentions_radio() {
        assert!(TargetId::Esp32c6.info().description().contains("802.15.4"));
        assert!(TargetId::Esp32.info().description().contains("Dual-core Xtensa"));
    }
}
