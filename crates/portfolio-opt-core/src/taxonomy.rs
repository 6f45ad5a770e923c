use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Static sector lookup: sector label -> asset identifiers, plus tickers that
/// must be excluded from every universe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorTaxonomy {
    pub sectors: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl SectorTaxonomy {
    pub fn new(sectors: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            sectors,
            denylist: Vec::new(),
        }
    }

    pub fn with_denylist(mut self, denylist: Vec<String>) -> Self {
        self.denylist = denylist;
        self
    }

    pub fn is_denylisted(&self, asset: &str) -> bool {
        let asset = asset.trim();
        self.denylist.iter().any(|d| d.trim() == asset)
    }

    pub fn has_sector(&self, sector: &str) -> bool {
        self.sectors.contains_key(sector)
    }

    /// First sector listing the asset, in label order.
    pub fn sector_of(&self, asset: &str) -> Option<&str> {
        let asset = asset.trim();
        self.sectors
            .iter()
            .find(|(_, members)| members.iter().any(|m| m.trim() == asset))
            .map(|(s, _)| s.as_str())
    }

    /// Sector membership as index lists into `asset_names`.
    ///
    /// An asset listed under several sectors counts towards each of them.
    /// Sectors with no member in the universe are omitted.
    pub fn sector_indices(&self, asset_names: &[String]) -> Vec<(String, Vec<usize>)> {
        self.sectors
            .iter()
            .filter_map(|(sector, members)| {
                let wanted: BTreeSet<&str> = members.iter().map(|m| m.trim()).collect();
                let idxs: Vec<usize> = asset_names
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| wanted.contains(a.trim()))
                    .map(|(i, _)| i)
                    .collect();
                if idxs.is_empty() {
                    None
                } else {
                    Some((sector.clone(), idxs))
                }
            })
            .collect()
    }

    /// Sorted, de-duplicated universe of every listed asset not on the denylist.
    pub fn universe(&self) -> Vec<String> {
        let all: BTreeSet<String> = self
            .sectors
            .values()
            .flatten()
            .map(|a| a.trim().to_string())
            .filter(|a| !self.is_denylisted(a))
            .collect();
        all.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> SectorTaxonomy {
        let mut sectors = BTreeMap::new();
        sectors.insert("Energy".to_string(), vec!["PETR4".to_string(), "PRIO3 ".to_string()]);
        sectors.insert("Banks".to_string(), vec!["ITUB4".to_string(), "BBAS3".to_string()]);
        SectorTaxonomy::new(sectors).with_denylist(vec!["BBAS3".into()])
    }

    #[test]
    fn test_sector_of_trims() {
        let t = taxonomy();
        assert_eq!(t.sector_of("PRIO3"), Some("Energy"));
        assert_eq!(t.sector_of("XXXX"), None);
    }

    #[test]
    fn test_sector_indices() {
        let t = taxonomy();
        let names: Vec<String> = vec!["ITUB4".into(), "PETR4".into(), "PRIO3".into()];
        let idx = t.sector_indices(&names);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx[0], ("Banks".to_string(), vec![0]));
        assert_eq!(idx[1], ("Energy".to_string(), vec![1, 2]));
    }

    #[test]
    fn test_universe_excludes_denylist() {
        let u = taxonomy().universe();
        assert_eq!(u, vec!["ITUB4", "PETR4", "PRIO3"]);
    }
}
