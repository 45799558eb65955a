//! The language-neutral type system
//!
//! [`SemanticType`] is the currency between the analyzer and code generation
//! backends. Raw SQL type tokens are classified through a dialect-specific
//! mapping; `Unknown` carries expressions whose type cannot be inferred and
//! must never silently become concrete.

use std::fmt;

use serde::Serialize;
use strum_macros::{Display, EnumString};

/// Parser/classifier dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SqlDialect {
    #[default]
    Sqlite,
    Mysql,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SemanticType {
    Integer,
    BigInteger,
    SmallInteger,
    TinyInteger,
    Serial,
    BigSerial,
    Float,
    Double,
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Numeric,
    Text,
    Char {
        n: Option<u32>,
    },
    Varchar {
        n: Option<u32>,
    },
    Blob,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
    Enum {
        name: String,
    },
    Unknown,
}

/// Families of the promotion lattice. LUB widens within a family; mixed
/// families collapse to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Decimal,
    Text,
    Blob,
    Boolean,
    Temporal,
    Uuid,
    Json,
    Enum,
    Unknown,
}

impl SemanticType {
    pub fn family(&self) -> TypeFamily {
        match self {
            SemanticType::Integer
            | SemanticType::BigInteger
            | SemanticType::SmallInteger
            | SemanticType::TinyInteger
            | SemanticType::Serial
            | SemanticType::BigSerial => TypeFamily::Integer,
            SemanticType::Float | SemanticType::Double => TypeFamily::Float,
            SemanticType::Decimal { .. } | SemanticType::Numeric => TypeFamily::Decimal,
            SemanticType::Text | SemanticType::Char { .. } | SemanticType::Varchar { .. } => {
                TypeFamily::Text
            }
            SemanticType::Blob => TypeFamily::Blob,
            SemanticType::Boolean => TypeFamily::Boolean,
            SemanticType::Date
            | SemanticType::Time
            | SemanticType::Timestamp
            | SemanticType::TimestampTz => TypeFamily::Temporal,
            SemanticType::Uuid => TypeFamily::Uuid,
            SemanticType::Json | SemanticType::Jsonb => TypeFamily::Json,
            SemanticType::Enum { .. } => TypeFamily::Enum,
            SemanticType::Unknown => TypeFamily::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SemanticType::Unknown)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.family(),
            TypeFamily::Integer | TypeFamily::Float | TypeFamily::Decimal
        )
    }

    /// Width rank within the integer family, for LUB widening.
    fn integer_rank(&self) -> u8 {
        match self {
            SemanticType::TinyInteger => 0,
            SemanticType::SmallInteger => 1,
            SemanticType::Integer | SemanticType::Serial => 2,
            SemanticType::BigInteger | SemanticType::BigSerial => 3,
            _ => 2,
        }
    }

    /// Least upper bound on the promotion lattice.
    ///
    /// Same family widens toward the wider member; mixed families yield
    /// `Unknown`. `Unknown` absorbs everything.
    pub fn lub(&self, other: &SemanticType) -> SemanticType {
        if self == other {
            return self.clone();
        }
        match (self.family(), other.family()) {
            (TypeFamily::Unknown, _) | (_, TypeFamily::Unknown) => SemanticType::Unknown,
            (TypeFamily::Integer, TypeFamily::Integer) => {
                if self.integer_rank() >= other.integer_rank() {
                    self.clone()
                } else {
                    other.clone()
                }
            }
            (TypeFamily::Float, TypeFamily::Float) => SemanticType::Double,
            // Integer widens into float and decimal.
            (TypeFamily::Integer, TypeFamily::Float) | (TypeFamily::Float, TypeFamily::Integer) => {
                SemanticType::Double
            }
            (TypeFamily::Integer, TypeFamily::Decimal) => other.clone(),
            (TypeFamily::Decimal, TypeFamily::Integer) => self.clone(),
            (TypeFamily::Decimal, TypeFamily::Decimal) => SemanticType::Numeric,
            (TypeFamily::Text, TypeFamily::Text) => SemanticType::Text,
            (TypeFamily::Temporal, TypeFamily::Temporal) => {
                // Timestamp subsumes date and time.
                if self == &SemanticType::TimestampTz || other == &SemanticType::TimestampTz {
                    SemanticType::TimestampTz
                } else {
                    SemanticType::Timestamp
                }
            }
            (TypeFamily::Json, TypeFamily::Json) => SemanticType::Json,
            _ => SemanticType::Unknown,
        }
    }

    /// Result type of an arithmetic binary operator over two operands.
    ///
    /// Integer op Integer stays integer (widened), any float operand forces
    /// `Double`, decimal is preserved.
    pub fn arithmetic_result(&self, other: &SemanticType) -> SemanticType {
        match (self.family(), other.family()) {
            (TypeFamily::Float, _) | (_, TypeFamily::Float) => SemanticType::Double,
            (TypeFamily::Decimal, _) => self.clone(),
            (_, TypeFamily::Decimal) => other.clone(),
            (TypeFamily::Integer, TypeFamily::Integer) => {
                if self.integer_rank() >= other.integer_rank() {
                    self.clone()
                } else {
                    other.clone()
                }
            }
            _ => SemanticType::Unknown,
        }
    }

    /// Classify a raw SQL type token (e.g. `VARCHAR(100)`, `bigint`) into a
    /// semantic type under the given dialect.
    ///
    /// The SQLite path follows the affinity rules: substring checks decide
    /// the family, and anything else falls back to numeric affinity.
    pub fn from_sql_token(raw: &str, dialect: SqlDialect) -> SemanticType {
        let (base, args) = split_type_token(raw);
        let upper = base.to_ascii_uppercase();
        let first = args.first().copied();
        let second = args.get(1).copied();

        // Exact names shared by both dialects.
        match upper.as_str() {
            "BOOLEAN" | "BOOL" => return SemanticType::Boolean,
            "DATE" => return SemanticType::Date,
            "TIME" => return SemanticType::Time,
            "DATETIME" | "TIMESTAMP" => return SemanticType::Timestamp,
            "TIMESTAMPTZ" => return SemanticType::TimestampTz,
            "UUID" => return SemanticType::Uuid,
            "JSONB" => return SemanticType::Jsonb,
            "JSON" => return SemanticType::Json,
            "SERIAL" => return SemanticType::Serial,
            "BIGSERIAL" => return SemanticType::BigSerial,
            "DECIMAL" | "NUMERIC" if !args.is_empty() => {
                return SemanticType::Decimal {
                    precision: first,
                    scale: second,
                };
            }
            "DECIMAL" | "NUMERIC" => return SemanticType::Numeric,
            "TINYINT" => return SemanticType::TinyInteger,
            "SMALLINT" => return SemanticType::SmallInteger,
            "BIGINT" => return SemanticType::BigInteger,
            "CHAR" | "CHARACTER" | "NCHAR" => return SemanticType::Char { n: first },
            "VARCHAR" | "NVARCHAR" => return SemanticType::Varchar { n: first },
            "FLOAT" | "REAL" => return SemanticType::Float,
            "DOUBLE" => return SemanticType::Double,
            _ => {}
        }

        match dialect {
            SqlDialect::Sqlite => {
                // Affinity by substring, in SQLite's documented order.
                if upper.contains("INT") {
                    SemanticType::Integer
                } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT")
                {
                    SemanticType::Text
                } else if upper.contains("BLOB") || upper.is_empty() {
                    SemanticType::Blob
                } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB")
                {
                    SemanticType::Double
                } else {
                    SemanticType::Numeric
                }
            }
            SqlDialect::Mysql => match upper.as_str() {
                "INT" | "INTEGER" | "MEDIUMINT" => SemanticType::Integer,
                "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => SemanticType::Text,
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                    SemanticType::Blob
                }
                "ENUM" => SemanticType::Enum { name: raw.to_string() },
                _ => SemanticType::Unknown,
            },
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Integer => write!(f, "integer"),
            SemanticType::BigInteger => write!(f, "biginteger"),
            SemanticType::SmallInteger => write!(f, "smallinteger"),
            SemanticType::TinyInteger => write!(f, "tinyinteger"),
            SemanticType::Serial => write!(f, "serial"),
            SemanticType::BigSerial => write!(f, "bigserial"),
            SemanticType::Float => write!(f, "float"),
            SemanticType::Double => write!(f, "double"),
            SemanticType::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => write!(f, "decimal({p},{s})"),
                (Some(p), None) => write!(f, "decimal({p})"),
                _ => write!(f, "decimal"),
            },
            SemanticType::Numeric => write!(f, "numeric"),
            SemanticType::Text => write!(f, "text"),
            SemanticType::Char { n: Some(n) } => write!(f, "char({n})"),
            SemanticType::Char { n: None } => write!(f, "char"),
            SemanticType::Varchar { n: Some(n) } => write!(f, "varchar({n})"),
            SemanticType::Varchar { n: None } => write!(f, "varchar"),
            SemanticType::Blob => write!(f, "blob"),
            SemanticType::Boolean => write!(f, "boolean"),
            SemanticType::Date => write!(f, "date"),
            SemanticType::Time => write!(f, "time"),
            SemanticType::Timestamp => write!(f, "timestamp"),
            SemanticType::TimestampTz => write!(f, "timestamptz"),
            SemanticType::Uuid => write!(f, "uuid"),
            SemanticType::Json => write!(f, "json"),
            SemanticType::Jsonb => write!(f, "jsonb"),
            SemanticType::Enum { name } => write!(f, "enum({name})"),
            SemanticType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Split `VARCHAR(100)` into `("VARCHAR", [100])`. Tokens without modifiers
/// pass through untouched.
fn split_type_token(raw: &str) -> (String, Vec<u32>) {
    let trimmed = raw.trim();
    match trimmed.find('(') {
        Some(open) => {
            let base = trimmed[..open].trim().to_string();
            let inner = trimmed[open + 1..].trim_end_matches(')');
            let args = inner
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .collect();
            (base, args)
        }
        None => (trimmed.to_string(), Vec::new()),
    }
}

/// A concrete type in the target host language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageType {
    pub name: String,
    pub import: Option<String>,
    /// Whether the host type already admits null (e.g. a pointer or interface).
    pub is_natively_nullable: bool,
}

/// Backend-side mapping from semantic types to host-language types.
///
/// Backends wrap non-natively-nullable types in their optional representation
/// themselves; the analyzer only reports nullability. `Unknown` must map to
/// the host's most general type.
pub trait LanguageMapper {
    fn map(&self, ty: &SemanticType) -> LanguageType;
}
