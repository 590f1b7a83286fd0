//! Column metadata reported by schema introspection.

/// Storage type family of a column, normalized across backend profiles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Json,
    /// Anything the profiles do not normalize (dates, decimals, ...).
    #[default]
    Other,
}

impl SqlType {
    /// Normalize a declared type name such as `VARCHAR(30)` or `bigint`.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL"
            | "BIGSERIAL" => SqlType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" => {
                SqlType::Real
            }
            "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER VARYING" | "CHARACTER" | "NVARCHAR"
            | "CLOB" => SqlType::Text,
            "BLOB" | "BYTEA" | "VARBINARY" | "BINARY" => SqlType::Blob,
            "BOOL" | "BOOLEAN" => SqlType::Boolean,
            "JSON" | "JSONB" => SqlType::Json,
            _ => SqlType::Other,
        }
    }
}

/// Parse the length argument out of a declared type, e.g. `VARCHAR(30)` → 30.
pub fn declared_max_length(declared: &str) -> Option<usize> {
    let open = declared.find('(')?;
    let close = declared[open..].find(')')? + open;
    let inner = &declared[open + 1..close];
    // DECIMAL(10, 2) is precision, not length.
    if inner.contains(',') {
        return None;
    }
    inner.trim().parse().ok()
}

/// One column as reported by the schema introspector.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub max_length: Option<usize>,
    /// Whether storage supplies a value when the column is omitted.
    pub has_default: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            max_length: None,
            has_default: false,
        }
    }

    /// Build from a declared type string, deriving type family and length.
    pub fn from_declared(name: impl Into<String>, declared: &str, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type: SqlType::from_declared(declared),
            nullable,
            max_length: declared_max_length(declared),
            has_default: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}
