//! Ordered environment variables, as a process sees them

use std::fmt;

/// Environment of one process
///
/// Keeps insertion order like a real `environ`, so `env` output looks
/// natural. Replacing a variable keeps its original position.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

/// Split one `KEY=value` string. A string without `=` is a key with an
/// empty value.
pub fn split(item: &str) -> (&str, &str) {
    let mut iter = item.splitn(2, '=');
    let key = iter.next().unwrap_or("");
    let value = iter.next().unwrap_or("");
    (key, value)
}

pub fn join(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

impl Environment {
    pub fn new() -> Self {
        Default::default()
    }

    /// Parse a list of `KEY=value` strings; later duplicates win
    pub fn parse<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Environment::new();
        for item in items {
            let (key, value) = split(item.as_ref());
            env.set(key, value);
        }
        env
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(item_key, _)| item_key == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        for item in self.vars.iter_mut() {
            if item.0 == key {
                item.1 = value;
                return;
            }
        }
        self.vars.push((key, value));
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.vars.iter().position(|(item_key, _)| item_key == key)?;
        Some(self.vars.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Every variable as a `KEY=value` string
    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|(key, value)| join(key, value)).collect()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_strings()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> std::iter::FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Environment::new();
        for (key, value) in iter {
            env.set(key, value);
        }
        env
    }
}
