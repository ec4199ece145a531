use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// The four set operators of the algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainOp {
    Union,
    Intersection,
    Difference,
    SymmetricDifference,
}

impl DomainOp {
    pub fn symbol(&self) -> char {
        match self {
            DomainOp::Union => '|',
            DomainOp::Intersection => '&',
            DomainOp::Difference => '/',
            DomainOp::SymmetricDifference => '^',
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "|" => Some(DomainOp::Union),
            "&" => Some(DomainOp::Intersection),
            "/" => Some(DomainOp::Difference),
            "^" => Some(DomainOp::SymmetricDifference),
            _ => None,
        }
    }
}

/// One element of a postfix domain expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainTerm {
    Leaf { country: String, asset_type: String },
    Op(DomainOp),
}

/// A tradeable-universe expression in postfix form.
///
/// Built either through the combinator methods or parsed from the manifest
/// syntax: whitespace-separated `COUNTRY:ASSET_TYPE` leaves and `| & / ^`
/// operators, e.g. `"US:equity GB:equity |"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDef {
    terms: Vec<DomainTerm>,
}

impl DomainDef {
    pub fn leaf(country: impl Into<String>, asset_type: impl Into<String>) -> Self {
        Self {
            terms: vec![DomainTerm::Leaf {
                country: country.into(),
                asset_type: asset_type.into(),
            }],
        }
    }

    fn combine(mut self, other: DomainDef, op: DomainOp) -> Self {
        self.terms.extend(other.terms);
        self.terms.push(DomainTerm::Op(op));
        self
    }

    pub fn union(self, other: DomainDef) -> Self {
        self.combine(other, DomainOp::Union)
    }

    pub fn intersection(self, other: DomainDef) -> Self {
        self.combine(other, DomainOp::Intersection)
    }

    pub fn difference(self, other: DomainDef) -> Self {
        self.combine(other, DomainOp::Difference)
    }

    pub fn symmetric_difference(self, other: DomainDef) -> Self {
        self.combine(other, DomainOp::SymmetricDifference)
    }

    pub fn terms(&self) -> &[DomainTerm] {
        &self.terms
    }

    /// Parses the manifest syntax. The result is validated structurally
    /// (operand/operator balance); resolution errors surface later in
    /// `compute_domain`.
    pub fn parse(expression: &str) -> Result<Self, DomainError> {
        let mut terms = Vec::new();
        let mut depth: usize = 0;
        for token in expression.split_whitespace() {
            if let Some(op) = DomainOp::from_symbol(token) {
                if depth < 2 {
                    return Err(DomainError::MalformedExpression(format!(
                        "operator '{token}' needs two operands in '{expression}'"
                    )));
                }
                depth -= 1;
                terms.push(DomainTerm::Op(op));
            } else {
                let (country, asset_type) = token.split_once(':').ok_or_else(|| {
                    DomainError::MalformedExpression(format!(
                        "leaf '{token}' must be COUNTRY:ASSET_TYPE"
                    ))
                })?;
                depth += 1;
                terms.push(DomainTerm::Leaf {
                    country: country.to_string(),
                    asset_type: asset_type.to_string(),
                });
            }
        }
        if terms.is_empty() {
            return Err(DomainError::MalformedExpression(
                "empty expression".to_string(),
            ));
        }
        if depth != 1 {
            return Err(DomainError::MalformedExpression(format!(
                "expression '{expression}' leaves {depth} operands on the stack"
            )));
        }
        Ok(Self { terms })
    }

    /// Canonical rendering; the basis of the stable domain id.
    pub fn canonical(&self) -> String {
        let mut rendered = String::new();
        for term in &self.terms {
            if !rendered.is_empty() {
                rendered.push(' ');
            }
            match term {
                DomainTerm::Leaf {
                    country,
                    asset_type,
                } => {
                    rendered.push_str(country);
                    rendered.push(':');
                    rendered.push_str(asset_type);
                }
                DomainTerm::Op(op) => rendered.push(op.symbol()),
            }
        }
        rendered
    }
}

/// A stable hash of the expression: the same leaves and operators always
/// produce the same id, across processes and runs.
pub fn domain_id(def: &DomainDef) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, def.canonical().as_bytes())
}

/// Which exchanges belong to which country code and asset type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeMapping {
    pub by_country: HashMap<String, BTreeSet<String>>,
    pub by_asset_type: HashMap<String, BTreeSet<String>>,
}

/// A resolved domain: concrete exchanges plus the merged trading schedule.
/// Immutable once computed; rollover replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStruct {
    exchanges: BTreeSet<String>,
    sessions: BTreeSet<NaiveDate>,
}

impl DomainStruct {
    pub fn exchanges(&self) -> &BTreeSet<String> {
        &self.exchanges
    }

    pub fn sessions(&self) -> &BTreeSet<NaiveDate> {
        &self.sessions
    }

    fn apply(self, other: DomainStruct, op: DomainOp) -> DomainStruct {
        let (left_e, right_e) = (self.exchanges, other.exchanges);
        let (left_s, right_s) = (self.sessions, other.sessions);
        let (exchanges, sessions) = match op {
            DomainOp::Union => (
                left_e.union(&right_e).cloned().collect(),
                left_s.union(&right_s).cloned().collect(),
            ),
            DomainOp::Intersection => (
                left_e.union(&right_e).cloned().collect(),
                left_s.intersection(&right_s).cloned().collect(),
            ),
            DomainOp::Difference => (
                left_e.difference(&right_e).cloned().collect(),
                left_s.difference(&right_s).cloned().collect(),
            ),
            DomainOp::SymmetricDifference => (
                left_e.union(&right_e).cloned().collect(),
                left_s.symmetric_difference(&right_s).cloned().collect(),
            ),
        };
        DomainStruct {
            exchanges,
            sessions,
        }
    }
}

/// Resolves one leaf: the exchanges trading that asset type in that country,
/// with sessions unioned across all member exchanges.
fn load_leaf(
    country: &str,
    asset_type: &str,
    mapping: &ExchangeMapping,
    sessions_per_exchange: &HashMap<String, BTreeSet<NaiveDate>>,
) -> Result<DomainStruct, DomainError> {
    let by_country = mapping
        .by_country
        .get(country)
        .ok_or_else(|| DomainError::UnknownCountry(country.to_string()))?;
    let by_asset = mapping
        .by_asset_type
        .get(asset_type)
        .ok_or_else(|| DomainError::UnknownAssetType(asset_type.to_string()))?;

    let exchanges: BTreeSet<String> = by_country.intersection(by_asset).cloned().collect();
    let mut sessions = BTreeSet::new();
    for exchange in &exchanges {
        let known = sessions_per_exchange
            .get(exchange)
            .ok_or_else(|| DomainError::MissingSessions(exchange.clone()))?;
        sessions.extend(known.iter().copied());
    }
    Ok(DomainStruct {
        exchanges,
        sessions,
    })
}

/// Stack evaluation of a postfix expression. Fails fast on a malformed
/// expression and on an empty result: a domain with zero sessions can never
/// run a session, so it is rejected here, before any state is touched.
pub fn compute_domain(
    def: &DomainDef,
    mapping: &ExchangeMapping,
    sessions_per_exchange: &HashMap<String, BTreeSet<NaiveDate>>,
) -> Result<DomainStruct, DomainError> {
    let mut stack: Vec<DomainStruct> = Vec::new();
    for term in def.terms() {
        match term {
            DomainTerm::Leaf {
                country,
                asset_type,
            } => {
                stack.push(load_leaf(
                    country,
                    asset_type,
                    mapping,
                    sessions_per_exchange,
                )?);
            }
            DomainTerm::Op(op) => {
                let right = stack.pop().ok_or_else(|| {
                    DomainError::MalformedExpression("operator with empty stack".to_string())
                })?;
                let left = stack.pop().ok_or_else(|| {
                    DomainError::MalformedExpression("operator with one operand".to_string())
                })?;
                stack.push(left.apply(right, *op));
            }
        }
    }
    let result = stack.pop().ok_or_else(|| {
        DomainError::MalformedExpression("expression produced no result".to_string())
    })?;
    if !stack.is_empty() {
        return Err(DomainError::MalformedExpression(format!(
            "{} unconsumed operands",
            stack.len()
        )));
    }
    if result.sessions.is_empty() {
        return Err(DomainError::EmptyDomain);
    }
    tracing::debug!(
        exchanges = result.exchanges.len(),
        sessions = result.sessions.len(),
        "resolved domain"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
    }

    fn mapping() -> ExchangeMapping {
        let mut by_country: HashMap<String, BTreeSet<String>> = HashMap::new();
        by_country.insert("US".into(), ["XNYS".to_string()].into_iter().collect());
        by_country.insert("GB".into(), ["XLON".to_string()].into_iter().collect());
        let mut by_asset_type: HashMap<String, BTreeSet<String>> = HashMap::new();
        by_asset_type.insert(
            "equity".into(),
            ["XNYS".to_string(), "XLON".to_string()].into_iter().collect(),
        );
        ExchangeMapping {
            by_country,
            by_asset_type,
        }
    }

    fn sessions() -> HashMap<String, BTreeSet<NaiveDate>> {
        let mut m = HashMap::new();
        m.insert(
            "XNYS".to_string(),
            [date(5), date(6), date(7)].into_iter().collect(),
        );
        m.insert(
            "XLON".to_string(),
            [date(6), date(7), date(8)].into_iter().collect(),
        );
        m
    }

    fn us() -> DomainDef {
        DomainDef::leaf("US", "equity")
    }

    fn gb() -> DomainDef {
        DomainDef::leaf("GB", "equity")
    }

    #[test]
    fn union_is_commutative_on_sessions() {
        let a = compute_domain(&us().union(gb()), &mapping(), &sessions()).unwrap();
        let b = compute_domain(&gb().union(us()), &mapping(), &sessions()).unwrap();
        assert_eq!(a.sessions(), b.sessions());
        assert_eq!(a.exchanges(), b.exchanges());
    }

    #[test]
    fn intersection_with_union_absorbs() {
        let a = compute_domain(&us(), &mapping(), &sessions()).unwrap();
        let both = compute_domain(
            &us().intersection(us().union(gb())),
            &mapping(),
            &sessions(),
        )
        .unwrap();
        assert_eq!(both.sessions(), a.sessions());
    }

    #[test]
    fn intersection_narrows_sessions_but_unions_exchanges() {
        let d = compute_domain(&us().intersection(gb()), &mapping(), &sessions()).unwrap();
        let expected: BTreeSet<NaiveDate> = [date(6), date(7)].into_iter().collect();
        assert_eq!(d.sessions(), &expected);
        // Both calendars matter for a cross-exchange schedule.
        assert_eq!(d.exchanges().len(), 2);
    }

    #[test]
    fn difference_can_produce_an_empty_domain() {
        let err = compute_domain(&us().difference(us()), &mapping(), &sessions()).unwrap_err();
        assert!(matches!(err, DomainError::EmptyDomain));
    }

    #[test]
    fn domain_id_is_stable_and_order_sensitive() {
        let id1 = domain_id(&us().union(gb()));
        let id2 = domain_id(&DomainDef::parse("US:equity GB:equity |").unwrap());
        assert_eq!(id1, id2);
        assert_ne!(id1, domain_id(&gb().union(us())));
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        assert!(DomainDef::parse("US:equity |").is_err());
        assert!(DomainDef::parse("US:equity GB:equity").is_err());
        assert!(DomainDef::parse("equity").is_err());
        assert!(DomainDef::parse("").is_err());
    }

    #[test]
    fn unknown_leaves_fail_fast() {
        let err = compute_domain(
            &DomainDef::leaf("JP", "equity"),
            &mapping(),
            &sessions(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::UnknownCountry(_)));
    }
}
