use crate::metaspace::chunklevel::MAX_CHUNK_BYTE_SIZE;
use crate::util::constants::{BYTES_IN_KBYTE, BYTES_IN_PAGE};
use crate::util::conversions;
use std::default::Default;

/// The default commit granule: 64K.
pub const DEFAULT_COMMIT_GRANULE_BYTES: usize = 64 * BYTES_IN_KBYTE;
/// The default reservation size of a virtual space node: 16 root chunks.
pub const DEFAULT_VIRTUAL_SPACE_NODE_RESERVE_BYTES: usize = 16 * MAX_CHUNK_BYTE_SIZE;

/// The prefix of environment variables that override options, e.g.
/// `METASPACE_COMMIT_GRANULE_BYTES=131072`.
pub const ENV_PREFIX: &str = "METASPACE_";

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_valid_commit_granule(v: &usize) -> bool {
    v.is_power_of_two() && *v >= BYTES_IN_PAGE && *v <= MAX_CHUNK_BYTE_SIZE
}

fn is_valid_node_reserve_size(v: &usize) -> bool {
    *v > 0 && conversions::raw_is_aligned(*v, MAX_CHUNK_BYTE_SIZE)
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Metaspace options. Each option can be overridden by an environment variable named
        /// after the option in upper case with the `METASPACE_` prefix.
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Create options with the built-in default values, ignoring the environment.
            pub fn from_defaults() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Set an option from its name and a string value. Returns false and keeps the
            /// current value if the name is unknown, or the value cannot be parsed or is invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("unknown option {}", s);
                        false
                    }
                }
            }

            /// Apply all `METASPACE_*` environment variables that match an option.
            pub fn read_env_var_settings(&mut self) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::from_defaults();
                options.read_env_var_settings();
                options
            }
        }
    ]
}

options! {
    // Memory is committed in granules of this many bytes. Must be a power of two between the page size and the root chunk size.
    commit_granule_bytes:             usize [is_valid_commit_granule]    = DEFAULT_COMMIT_GRANULE_BYTES,
    // The size of the address range reserved by each virtual space node. Must be a multiple of the root chunk size.
    virtual_space_node_reserve_bytes: usize [is_valid_node_reserve_size] = DEFAULT_VIRTUAL_SPACE_NODE_RESERVE_BYTES,
    // Upper bound of committed memory across all nodes of a context. 0 means unlimited.
    max_committed_bytes:              usize [always_valid]               = 0,
    // Should newly carved root chunks be committed in full?
    new_chunks_are_fully_committed:   bool  [always_valid]               = false,
    // Should free chunks of at least one commit granule be uncommitted when they are returned?
    uncommit_free_chunks:             bool  [always_valid]               = true,
}

impl Options {
    /// The commit granule in words.
    pub fn commit_granule_words(&self) -> usize {
        conversions::bytes_to_words(self.commit_granule_bytes)
    }

    /// The commit limit in words. 0 means unlimited.
    pub fn max_committed_words(&self) -> usize {
        conversions::bytes_to_words_up(self.max_committed_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.commit_granule_bytes, DEFAULT_COMMIT_GRANULE_BYTES);
            assert_eq!(options.max_committed_bytes, 0);
            assert!(options.uncommit_free_chunks);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("METASPACE_COMMIT_GRANULE_BYTES", "131072");
                    std::env::set_var("METASPACE_NEW_CHUNKS_ARE_FULLY_COMMITTED", "true");

                    let options = Options::default();
                    assert_eq!(options.commit_granule_bytes, 131072);
                    assert!(options.new_chunks_are_fully_committed);
                },
                || {
                    std::env::remove_var("METASPACE_COMMIT_GRANULE_BYTES");
                    std::env::remove_var("METASPACE_NEW_CHUNKS_ARE_FULLY_COMMITTED");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // Not a power of two.
                    std::env::set_var("METASPACE_COMMIT_GRANULE_BYTES", "100000");

                    let options = Options::default();
                    assert_eq!(options.commit_granule_bytes, DEFAULT_COMMIT_GRANULE_BYTES);
                },
                || {
                    std::env::remove_var("METASPACE_COMMIT_GRANULE_BYTES");
                },
            )
        })
    }

    #[test]
    fn set_from_str() {
        let mut options = Options::from_defaults();
        assert!(options.set_from_str("max_committed_bytes", "1048576"));
        assert_eq!(options.max_committed_words(), 1048576 / crate::util::constants::BYTES_IN_WORD);
        // Not a multiple of the root chunk size
        assert!(!options.set_from_str("virtual_space_node_reserve_bytes", "4096"));
        assert_eq!(
            options.virtual_space_node_reserve_bytes,
            DEFAULT_VIRTUAL_SPACE_NODE_RESERVE_BYTES
        );
        assert!(!options.set_from_str("no_such_option", "1"));
        assert!(!options.set_from_str("uncommit_free_chunks", "maybe"));
    }
}
