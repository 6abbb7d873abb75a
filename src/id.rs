//! Prefixed ids for jobs, tables, columns, uploads and datasets.
//!
//! Format: [4-char prefix][26-char nanoid] = 30 chars total
//! Alphabet: lowercase alphanumeric (0-9, a-z)

const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Defines `ResourceId` and rejects, at compile time, prefixes that are
/// duplicated, not 4 characters long, or outside the id alphabet.
///
/// ```compile_fail
/// ingestdb::define_resource_ids! {
///     Foo => "test",
///     Bar => "test",
/// }
/// ```
///
/// ```compile_fail
/// ingestdb::define_resource_ids! {
///     Foo => "CONN",
/// }
/// ```
#[macro_export]
macro_rules! define_resource_ids {
    ($($variant:ident => $prefix:literal),+ $(,)?) => {
        const _: () = {
            const PREFIXES: &[&str] = &[$($prefix),+];

            const fn is_valid_char(c: u8) -> bool {
                (c >= b'0' && c <= b'9') || (c >= b'a' && c <= b'z')
            }

            const fn validate_prefixes() {
                let mut i = 0;
                while i < PREFIXES.len() {
                    let prefix = PREFIXES[i].as_bytes();

                    // Check length is exactly 4
                    if prefix.len() != 4 {
                        panic!("prefix must be exactly 4 characters");
                    }

                    // Check all characters are in alphabet (0-9, a-z)
                    let mut c = 0;
                    while c < prefix.len() {
                        if !is_valid_char(prefix[c]) {
                            panic!("prefix must only contain lowercase alphanumeric (0-9, a-z)");
                        }
                        c += 1;
                    }

                    // Check uniqueness against subsequent prefixes
                    let mut j = i + 1;
                    while j < PREFIXES.len() {
                        let other = PREFIXES[j].as_bytes();
                        let mut k = 0;
                        let mut equal = true;
                        while k < 4 {
                            if prefix[k] != other[k] { equal = false; }
                            k += 1;
                        }
                        if equal { panic!("duplicate prefix"); }
                        j += 1;
                    }
                    i += 1;
                }
            }
            validate_prefixes();
        };

        /// The type of resource ID, determining its prefix.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ResourceId {
            $($variant),+
        }

        impl ResourceId {
            /// Returns the 4-character prefix for this resource ID type.
            pub const fn prefix(&self) -> &'static str {
                match self {
                    $(Self::$variant => $prefix),+
                }
            }
        }
    };
}

define_resource_ids! {
    Job => "ijob",
    Table => "tabl",
    Column => "colm",
    Upload => "file",
    Dataset => "dset",
}

/// Generate a 30-char ID: 4-char prefix + 26-char nanoid (lowercase alphanumeric).
pub fn generate_id(resource: ResourceId) -> String {
    let suffix = nanoid::nanoid!(26, &ID_ALPHABET);
    format!("{}{}", resource.prefix(), suffix)
}

/// Generate an ingestion job ID (prefix: "ijob").
pub fn generate_job_id() -> String {
    generate_id(ResourceId::Job)
}

/// Generate a storage table ID (prefix: "tabl").
pub fn generate_table_id() -> String {
    generate_id(ResourceId::Table)
}

/// Generate a column ID (prefix: "colm"). Column IDs survive re-inference.
pub fn generate_column_id() -> String {
    generate_id(ResourceId::Column)
}

/// Generate a file upload ID (prefix: "file").
pub fn generate_upload_id() -> String {
    generate_id(ResourceId::Upload)
}

/// Generate a dataset ID (prefix: "dset").
pub fn generate_dataset_id() -> String {
    generate_id(ResourceId::Dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_id_format(id: &str, prefix: &str) {
        assert_eq!(id.len(), 30);
        assert!(id.starts_with(prefix));
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_job_id_format() {
        assert_id_format(&generate_job_id(), "ijob");
    }

    #[test]
    fn test_table_and_column_id_format() {
        assert_id_format(&generate_table_id(), "tabl");
        assert_id_format(&generate_column_id(), "colm");
    }

    #[test]
    fn test_upload_and_dataset_id_format() {
        assert_id_format(&generate_upload_id(), "file");
        assert_id_format(&generate_dataset_id(), "dset");
    }

    #[test]
    fn test_ids_are_unique() {
        let id1 = generate_column_id();
        let id2 = generate_column_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_resource_id_prefixes() {
        assert_eq!(ResourceId::Job.prefix(), "ijob");
        assert_eq!(ResourceId::Table.prefix(), "tabl");
        assert_eq!(ResourceId::Dataset.prefix(), "dset");
    }
}
