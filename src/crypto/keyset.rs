use crate::crypto::{AccessKey, AesKey, AesXtsKey, KeyParseError};
use crate::ids::RightsId;
use binrw::{BinRead, BinWrite};
use ini::Properties;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which key-area key family an NCA selects (header byte 0x207).
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum KeyAreaKeyIndex {
    Application,
    Ocean,
    System,
}

pub struct KeyName {
    pub key_name: &'static str,
    pub index: Option<usize>,
}

impl Debug for KeyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(index) = self.index {
            write!(f, "{}_{:02x}", self.key_name, index)
        } else {
            write!(f, "{}", self.key_name)
        }
    }
}

impl Display for KeyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Snafu, Debug)]
#[snafu(display("Missing key {} in the key set", key_name))]
pub struct MissingKeyError {
    pub key_name: KeyName,
}

#[derive(Snafu, Debug)]
#[snafu(display("No title key for rights id {}", rights_id))]
pub struct MissingTitleKeyError {
    pub rights_id: RightsId,
}

#[derive(Snafu, Debug)]
pub enum KeySetParseError {
    #[snafu(display("Could not parse keyset file at line {} column {}: {}", line, col, msg))]
    FileParse {
        line: usize,
        col: usize,
        msg: String,
    },
    #[snafu(display("Could not parse key {}: {}", key_name, source))]
    KeyParse {
        key_name: KeyName,
        source: KeyParseError,
    },
    #[snafu(display("Could not parse rights id {:?}", value))]
    RightsIdParse { value: String },
}

#[derive(Snafu, Debug)]
pub enum SystemKeysetError {
    Parse { source: KeySetParseError },
    NotFound { tried: Vec<PathBuf> },
    Io { source: std::io::Error },
}

/// The mutable, title-scoped half of the key material: rights id to access
/// key. Callers must serialize mutations before opening sections that
/// consume them.
#[derive(Debug, Clone, Default)]
pub struct ExternalKeySet {
    keys: HashMap<RightsId, AccessKey>,
}

impl ExternalKeySet {
    /// Returns `true` if the key was not known before.
    pub fn insert(&mut self, rights_id: RightsId, access_key: AccessKey) -> bool {
        self.keys.insert(rights_id, access_key).is_none()
    }

    pub fn get(&self, rights_id: &RightsId) -> Option<AccessKey> {
        self.keys.get(rights_id).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

const KEY_GENERATIONS: usize = 0x20;

/// Loaded fixed key material, hactool `prod.keys` format. Immutable during
/// processing apart from external title key insertion.
#[derive(Clone, Default)]
pub struct KeySet {
    header_key: Option<AesXtsKey>,
    title_kek: [Option<AesKey>; KEY_GENERATIONS],
    key_area_key_application: [Option<AesKey>; KEY_GENERATIONS],
    key_area_key_ocean: [Option<AesKey>; KEY_GENERATIONS],
    key_area_key_system: [Option<AesKey>; KEY_GENERATIONS],
    fixed_key_modulus: Option<[u8; 0x100]>,
    nca0_key_area_key: Option<rsa::RsaPrivateKey>,
    external_keys: ExternalKeySet,
}

impl Debug for KeySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // key material stays out of debug output
        f.debug_struct("KeySet")
            .field("external_keys", &self.external_keys.len())
            .finish_non_exhaustive()
    }
}

impl KeySet {
    /// Loads a keyset from a file in the format used by hactool.
    ///
    /// By default the file is searched as "switch/prod.keys" in the user's
    /// config directory and ".switch/prod.keys" in the home directory.
    /// Providing an explicit path skips the system locations.
    pub fn from_system(key_path: Option<&Path>) -> Result<Self, SystemKeysetError> {
        let paths = if let Some(key_path) = key_path {
            vec![Some(key_path.into())]
        } else {
            vec![
                dirs_next::config_dir().map(|mut v| {
                    v.push("switch");
                    v.push("prod.keys");
                    v
                }),
                dirs_next::home_dir().map(|mut v| {
                    v.push(".switch");
                    v.push("prod.keys");
                    v
                }),
            ]
        }
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

        for path in paths.iter() {
            match std::fs::read_to_string(path) {
                Ok(r) => return Self::from_file_contents(&r).context(ParseSnafu {}),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    continue;
                }
                e => {
                    e.context(IoSnafu)?;
                }
            }
        }

        Err(SystemKeysetError::NotFound { tried: paths })
    }

    pub fn from_file_contents(contents: &str) -> Result<Self, KeySetParseError> {
        let ini = ini::Ini::load_from_str_noescape(contents).map_err(|e| {
            KeySetParseError::FileParse {
                line: e.line,
                col: e.col,
                msg: e.msg,
            }
        })?;
        let props = ini.general_section();

        fn parse_key<K: FromStr<Err = KeyParseError>>(
            props: &Properties,
            name: &'static str,
        ) -> Result<Option<K>, KeySetParseError> {
            props
                .get(name)
                .map(|s| s.parse())
                .transpose()
                .map_err(|source| KeySetParseError::KeyParse {
                    key_name: KeyName {
                        key_name: name,
                        index: None,
                    },
                    source,
                })
        }

        fn parse_keys<K: FromStr<Err = KeyParseError> + Copy, const N: usize>(
            props: &Properties,
            name: &'static str,
        ) -> Result<[Option<K>; N], KeySetParseError> {
            let mut result = [None; N];
            for (i, result) in result.iter_mut().enumerate() {
                let key_name = KeyName {
                    key_name: name,
                    index: Some(i),
                };
                let key = props
                    .get(&key_name.to_string())
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|source| KeySetParseError::KeyParse { key_name, source })?;
                *result = key;
            }
            Ok(result)
        }

        let fixed_key_modulus = props
            .get("nca_hdr_fixed_key_modulus")
            .map(|s| {
                let mut modulus = [0; 0x100];
                crate::crypto::parse_key(s, &mut modulus).map(|_| modulus)
            })
            .transpose()
            .map_err(|source| KeySetParseError::KeyParse {
                key_name: KeyName {
                    key_name: "nca_hdr_fixed_key_modulus",
                    index: None,
                },
                source,
            })?;

        Ok(Self {
            header_key: parse_key(props, "header_key")?,
            title_kek: parse_keys(props, "titlekek")?,
            key_area_key_application: parse_keys(props, "key_area_key_application")?,
            key_area_key_ocean: parse_keys(props, "key_area_key_ocean")?,
            key_area_key_system: parse_keys(props, "key_area_key_system")?,
            fixed_key_modulus,
            nca0_key_area_key: None,
            external_keys: ExternalKeySet::default(),
        })
    }

    /// Imports a hactool-format `title.keys` file: one `rights_id = key`
    /// line per title.
    pub fn import_title_keys(&mut self, contents: &str) -> Result<usize, KeySetParseError> {
        let ini = ini::Ini::load_from_str_noescape(contents).map_err(|e| {
            KeySetParseError::FileParse {
                line: e.line,
                col: e.col,
                msg: e.msg,
            }
        })?;

        let mut imported = 0;
        for (id, key) in ini.general_section().iter() {
            let rights_id: RightsId =
                id.parse()
                    .map_err(|_| KeySetParseError::RightsIdParse {
                        value: id.to_string(),
                    })?;
            let access_key: AccessKey =
                key.parse()
                    .map_err(|source| KeySetParseError::KeyParse {
                        key_name: KeyName {
                            key_name: "title_key",
                            index: None,
                        },
                        source,
                    })?;
            if self.external_keys.insert(rights_id, access_key) {
                imported += 1;
            }
        }
        Ok(imported)
    }

    pub fn header_key(&self) -> Result<AesXtsKey, MissingKeyError> {
        self.header_key.ok_or(MissingKeyError {
            key_name: KeyName {
                key_name: "header_key",
                index: None,
            },
        })
    }

    pub fn set_header_key(&mut self, key: AesXtsKey) {
        self.header_key = Some(key);
    }

    pub fn title_kek(&self, revision: usize) -> Result<AesKey, MissingKeyError> {
        self.title_kek
            .get(revision)
            .copied()
            .flatten()
            .ok_or(MissingKeyError {
                key_name: KeyName {
                    key_name: "titlekek",
                    index: Some(revision),
                },
            })
    }

    pub fn set_title_kek(&mut self, revision: usize, key: AesKey) {
        self.title_kek[revision] = Some(key);
    }

    pub fn key_area_key(
        &self,
        revision: usize,
        index: KeyAreaKeyIndex,
    ) -> Result<AesKey, MissingKeyError> {
        let (keys, name) = match index {
            KeyAreaKeyIndex::Application => {
                (&self.key_area_key_application, "key_area_key_application")
            }
            KeyAreaKeyIndex::Ocean => (&self.key_area_key_ocean, "key_area_key_ocean"),
            KeyAreaKeyIndex::System => (&self.key_area_key_system, "key_area_key_system"),
        };
        keys.get(revision)
            .copied()
            .flatten()
            .ok_or(MissingKeyError {
                key_name: KeyName {
                    key_name: name,
                    index: Some(revision),
                },
            })
    }

    pub fn set_key_area_key(&mut self, revision: usize, index: KeyAreaKeyIndex, key: AesKey) {
        let keys = match index {
            KeyAreaKeyIndex::Application => &mut self.key_area_key_application,
            KeyAreaKeyIndex::Ocean => &mut self.key_area_key_ocean,
            KeyAreaKeyIndex::System => &mut self.key_area_key_system,
        };
        keys[revision] = Some(key);
    }

    pub fn access_key(&self, rights_id: &RightsId) -> Result<AccessKey, MissingTitleKeyError> {
        self.external_keys.get(rights_id).ok_or(MissingTitleKeyError {
            rights_id: *rights_id,
        })
    }

    /// Registers an external title key. Returns `true` if it was new.
    pub fn insert_title_key(&mut self, rights_id: RightsId, access_key: AccessKey) -> bool {
        self.external_keys.insert(rights_id, access_key)
    }

    pub fn external_keys(&self) -> &ExternalKeySet {
        &self.external_keys
    }

    /// RSA-2048 modulus used to check the fixed-key header signature.
    pub fn fixed_key_modulus(&self) -> Option<&[u8; 0x100]> {
        self.fixed_key_modulus.as_ref()
    }

    pub fn set_fixed_key_modulus(&mut self, modulus: [u8; 0x100]) {
        self.fixed_key_modulus = Some(modulus);
    }

    /// RSA-OAEP private key unwrapping NCA0 key areas.
    pub fn nca0_key_area_key(&self) -> Option<&rsa::RsaPrivateKey> {
        self.nca0_key_area_key.as_ref()
    }

    pub fn set_nca0_key_area_key(&mut self, key: rsa::RsaPrivateKey) {
        self.nca0_key_area_key = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hactool_format() {
        let keys = "\
header_key = aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
titlekek_00 = bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
key_area_key_application_00 = cccccccccccccccccccccccccccccccc
";
        let key_set = KeySet::from_file_contents(keys).unwrap();
        assert_eq!(key_set.header_key().unwrap().0, [0xaa; 0x20]);
        assert_eq!(key_set.title_kek(0).unwrap().0, [0xbb; 0x10]);
        assert_eq!(
            key_set
                .key_area_key(0, KeyAreaKeyIndex::Application)
                .unwrap()
                .0,
            [0xcc; 0x10]
        );
        assert!(key_set.title_kek(1).is_err());
    }

    #[test]
    fn title_key_insertion() {
        let mut key_set = KeySet::default();
        let rights_id: RightsId = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        let access_key = AccessKey([0xAA; 0x10]);

        assert!(key_set.access_key(&rights_id).is_err());
        assert!(key_set.insert_title_key(rights_id, access_key));
        assert!(!key_set.insert_title_key(rights_id, access_key));
        assert_eq!(key_set.access_key(&rights_id).unwrap().0, [0xAA; 0x10]);
    }
}
