use std::collections::HashSet;

use crate::limits::*;
use crate::model::Resource;

/// The fixed set of reservable tables, in declaration order.
///
/// Built once at startup and shared read-only; order is what breaks
/// best-fit ties, so it is preserved exactly as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    resources: Vec<Resource>,
}

impl Catalog {
    pub fn new(resources: Vec<Resource>) -> Result<Self, CatalogError> {
        if resources.is_empty() {
            return Err(CatalogError::Empty);
        }
        if resources.len() > MAX_RESOURCES {
            return Err(CatalogError::TooMany(resources.len()));
        }
        let mut seen = HashSet::with_capacity(resources.len());
        for r in &resources {
            if r.id.is_empty() || r.id.len() > MAX_RESOURCE_ID_LEN {
                return Err(CatalogError::BadId(r.id.clone()));
            }
            if r.capacity == 0 {
                return Err(CatalogError::ZeroCapacity(r.id.clone()));
            }
            if !seen.insert(r.id.as_str()) {
                return Err(CatalogError::DuplicateId(r.id.clone()));
            }
        }
        Ok(Self { resources })
    }

    /// Four tables seating one to four.
    pub fn restaurant_default() -> Self {
        Self {
            resources: vec![
                Resource::new("Apple", 1),
                Resource::new("Banana", 2),
                Resource::new("Cherry", 3),
                Resource::new("Date", 4),
            ],
        }
    }

    /// Parse `id:capacity` pairs separated by commas, e.g. `Apple:1,Banana:2`.
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let mut resources = Vec::new();
        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, capacity) = entry
                .split_once(':')
                .ok_or_else(|| CatalogError::Malformed(entry.to_string()))?;
            let capacity: u32 = capacity
                .trim()
                .parse()
                .map_err(|_| CatalogError::Malformed(entry.to_string()))?;
            resources.push(Resource::new(id.trim(), capacity));
        }
        Self::new(resources)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn max_capacity(&self) -> u32 {
        self.resources.iter().map(|r| r.capacity).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    Empty,
    TooMany(usize),
    BadId(String),
    DuplicateId(String),
    ZeroCapacity(String),
    Malformed(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Empty => write!(f, "catalog has no tables"),
            CatalogError::TooMany(n) => {
                write!(f, "catalog has {n} tables, limit is {MAX_RESOURCES}")
            }
            CatalogError::BadId(id) => write!(f, "invalid table id: {id:?}"),
            CatalogError::DuplicateId(id) => write!(f, "duplicate table id: {id}"),
            CatalogError::ZeroCapacity(id) => write!(f, "table {id} has zero capacity"),
            CatalogError::Malformed(entry) => {
                write!(f, "malformed table entry {entry:?} (expected id:capacity)")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let catalog = Catalog::restaurant_default();
        let ids: Vec<_> = catalog.resources().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["Apple", "Banana", "Cherry", "Date"]);
        assert_eq!(catalog.max_capacity(), 4);
        // The hand-built default must pass the same checks as everything else.
        assert_eq!(Catalog::new(catalog.resources().to_vec()).unwrap(), catalog);
    }

    #[test]
    fn parse_preserves_order() {
        let catalog = Catalog::parse("Window:2, Booth:6 ,Bar:1").unwrap();
        assert_eq!(
            catalog.resources(),
            &[
                Resource::new("Window", 2),
                Resource::new("Booth", 6),
                Resource::new("Bar", 1),
            ]
        );
        assert_eq!(catalog.get("Booth").map(|r| r.capacity), Some(6));
        assert!(catalog.get("Patio").is_none());
    }

    #[test]
    fn parse_ignores_trailing_comma() {
        let catalog = Catalog::parse("A:1,B:2,").unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn parse_rejects_missing_capacity() {
        assert!(matches!(Catalog::parse("A:1,B"), Err(CatalogError::Malformed(_))));
        assert!(matches!(Catalog::parse("A:x"), Err(CatalogError::Malformed(_))));
        assert!(matches!(Catalog::parse("A:-1"), Err(CatalogError::Malformed(_))));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Catalog::new(vec![]), Err(CatalogError::Empty));
        assert_eq!(Catalog::parse(" , "), Err(CatalogError::Empty));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let result = Catalog::new(vec![Resource::new("A", 1), Resource::new("A", 2)]);
        assert_eq!(result, Err(CatalogError::DuplicateId("A".into())));
    }

    #[test]
    fn rejects_zero_capacity() {
        let result = Catalog::new(vec![Resource::new("A", 0)]);
        assert_eq!(result, Err(CatalogError::ZeroCapacity("A".into())));
    }

    #[test]
    fn rejects_long_id() {
        let id = "x".repeat(MAX_RESOURCE_ID_LEN + 1);
        let result = Catalog::new(vec![Resource::new(id, 1)]);
        assert!(matches!(result, Err(CatalogError::BadId(_))));
    }
}
