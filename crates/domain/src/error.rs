use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed domain expression: {0}")]
    MalformedExpression(String),

    #[error("Unknown country code: {0}")]
    UnknownCountry(String),

    #[error("Unknown asset type: {0}")]
    UnknownAssetType(String),

    #[error("Domain expression resolves to zero sessions; an empty domain can never run")]
    EmptyDomain,

    #[error("No sessions known for exchange {0}")]
    MissingSessions(String),

    #[error("Unknown domain id: {0}")]
    UnknownDomainId(uuid::Uuid),
}
