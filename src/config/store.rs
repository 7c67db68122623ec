//! Durable key/value access to TOML config files.

use std::{
    collections::BTreeMap,
    fs, io,
    path::PathBuf,
};

use toml::{Table, Value};

use super::ConfigError;

/// Section/key access to a durable config file.
pub trait ConfigStore {
    /// Reads a single value. Missing files, sections, and keys are `None`.
    fn read(&self, section: &str, key: &str) -> Option<String>;

    /// Writes every key/value pair into `section`, creating it if needed.
    fn write(&self, section: &str, values: &BTreeMap<String, String>) -> Result<(), ConfigError>;
}

/// A [`ConfigStore`] backed by a TOML file on disk.
///
/// The file is re-read on every call; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct TomlStore {
    path: PathBuf,
}

impl TomlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Table, ConfigError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Table::new()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        contents
            .parse::<Table>()
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

impl ConfigStore for TomlStore {
    fn read(&self, section: &str, key: &str) -> Option<String> {
        let table = match self.load() {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("failed to read {section}.{key}: {e}");
                return None;
            }
        };
        match table.get(section)?.get(key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn write(&self, section: &str, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        let mut table = self.load()?;

        let entry = table
            .entry(section)
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        if let Value::Table(section_table) = entry {
            for (key, value) in values {
                section_table.insert(key.clone(), typed_value(value));
            }
        }

        let contents = toml::to_string(&table)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        fs::write(&self.path, contents).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Booleans and integers keep their TOML types; everything else is a string.
fn typed_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => match raw.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::String(raw.to_string()),
        },
    }
}

/// In-memory store that counts writes and can be told to fail them.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: std::cell::RefCell<BTreeMap<(String, String), String>>,
    writes: std::cell::Cell<usize>,
    fail_writes: bool,
}

#[cfg(test)]
impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn set(&self, section: &str, key: &str, value: &str) {
        self.values
            .borrow_mut()
            .insert((section.into(), key.into()), value.into());
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

#[cfg(test)]
impl ConfigStore for MemoryStore {
    fn read(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .borrow()
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn write(&self, section: &str, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        self.writes.set(self.writes.get() + 1);
        if self.fail_writes {
            return Err(ConfigError::Write {
                path: PathBuf::from("memory"),
                source: io::Error::other("read-only store"),
            });
        }
        for (key, value) in values {
            self.set(section, key, value);
        }
        Ok(())
    }
}
