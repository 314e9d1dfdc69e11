use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lineage string and its paired rank detail records disagree.
    IngestionMismatch(String),
    /// A rank prefix maps to more than one rank name at validation time.
    PrefixAmbiguity { prefix: char, ranks: String },
    /// The parent referenced by an append is absent or unusable.
    UnknownParent(String),
    /// A taxon segment could not be parsed even after delimiter repair.
    MalformedLineage(String),
    /// A rank name or prefix is not in the accepted rank set.
    UnknownRank(String),
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::IngestionMismatch(msg) => {
                write!(f, "Lineage and rank detail records disagree: {}", msg)
            }
            ErrorKind::PrefixAmbiguity { prefix, ranks } => {
                write!(
                    f,
                    "Conflicting rank names detected for rank prefix '{}': {}",
                    prefix, ranks
                )
            }
            ErrorKind::UnknownParent(msg) => write!(f, "Unknown parent: {}", msg),
            ErrorKind::MalformedLineage(msg) => write!(f, "Malformed lineage: {}", msg),
            ErrorKind::UnknownRank(rank) => {
                write!(f, "Rank '{}' is not in the accepted rank set", rank)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
