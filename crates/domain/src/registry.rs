use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::algebra::{DomainDef, DomainStruct, ExchangeMapping, compute_domain, domain_id};
use crate::error::DomainError;

/// Explicitly constructed cache of resolved domains, keyed by the stable
/// domain id. One expression resolves once; sessions sharing a domain share
/// the resolved struct and therefore the same clock set.
///
/// The registry is owned by the process entry point and injected where
/// needed; there is no module-level singleton.
pub struct DomainRegistry {
    mapping: ExchangeMapping,
    cache: HashMap<Uuid, (DomainDef, Arc<DomainStruct>)>,
}

impl DomainRegistry {
    pub fn new(mapping: ExchangeMapping) -> Self {
        Self {
            mapping,
            cache: HashMap::new(),
        }
    }

    pub fn mapping(&self) -> &ExchangeMapping {
        &self.mapping
    }

    /// Resolves an expression, computing it at most once per id.
    pub fn resolve(
        &mut self,
        def: &DomainDef,
        sessions_per_exchange: &HashMap<String, BTreeSet<NaiveDate>>,
    ) -> Result<(Uuid, Arc<DomainStruct>), DomainError> {
        let id = domain_id(def);
        if let Some((_, cached)) = self.cache.get(&id) {
            return Ok((id, Arc::clone(cached)));
        }
        let resolved = Arc::new(compute_domain(def, &self.mapping, sessions_per_exchange)?);
        tracing::info!(domain_id = %id, exchanges = resolved.exchanges().len(), "cached new domain");
        self.cache
            .insert(id, (def.clone(), Arc::clone(&resolved)));
        Ok((id, resolved))
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<DomainStruct>> {
        self.cache.get(id).map(|(_, d)| Arc::clone(d))
    }

    /// Recomputes a cached domain whose session window has been exhausted.
    /// Callers supply the refreshed per-exchange sessions; the cache entry
    /// is replaced so every holder of the id observes the new window.
    pub fn rollover(
        &mut self,
        id: &Uuid,
        sessions_per_exchange: &HashMap<String, BTreeSet<NaiveDate>>,
    ) -> Result<Arc<DomainStruct>, DomainError> {
        let def = self
            .cache
            .get(id)
            .map(|(def, _)| def.clone())
            .ok_or(DomainError::UnknownDomainId(*id))?;
        let resolved = Arc::new(compute_domain(&def, &self.mapping, sessions_per_exchange)?);
        self.cache.insert(*id, (def, Arc::clone(&resolved)));
        tracing::debug!(domain_id = %id, "domain rolled over");
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::DomainDef;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
    }

    fn registry() -> DomainRegistry {
        let mut mapping = ExchangeMapping::default();
        mapping
            .by_country
            .insert("US".into(), ["XNYS".to_string()].into_iter().collect());
        mapping
            .by_asset_type
            .insert("equity".into(), ["XNYS".to_string()].into_iter().collect());
        DomainRegistry::new(mapping)
    }

    fn sessions(days: &[u32]) -> HashMap<String, BTreeSet<NaiveDate>> {
        let mut m = HashMap::new();
        m.insert(
            "XNYS".to_string(),
            days.iter().map(|d| date(*d)).collect(),
        );
        m
    }

    #[test]
    fn resolve_caches_by_stable_id() {
        let mut reg = registry();
        let def = DomainDef::leaf("US", "equity");
        let (id1, d1) = reg.resolve(&def, &sessions(&[5, 6])).unwrap();
        // Different sessions on the second call: the cache must win.
        let (id2, d2) = reg.resolve(&def, &sessions(&[7, 8])).unwrap();
        assert_eq!(id1, id2);
        assert!(Arc::ptr_eq(&d1, &d2));
    }

    #[test]
    fn rollover_replaces_the_cached_struct() {
        let mut reg = registry();
        let def = DomainDef::leaf("US", "equity");
        let (id, before) = reg.resolve(&def, &sessions(&[5, 6])).unwrap();
        let after = reg.rollover(&id, &sessions(&[7, 8])).unwrap();
        assert_ne!(before.sessions(), after.sessions());
        assert_eq!(reg.get(&id).unwrap().sessions(), after.sessions());
    }

    #[test]
    fn rollover_of_unknown_id_fails() {
        let mut reg = registry();
        let err = reg
            .rollover(&Uuid::nil(), &sessions(&[5]))
            .unwrap_err();
        assert!(matches!(err, DomainError::UnknownDomainId(_)));
    }
}
