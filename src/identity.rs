//! Accounts a session can log in as

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One account, as it would appear in `/etc/passwd`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

impl User {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Username to account lookup, loaded by whoever reads the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<User>", into = "Vec<User>")]
pub struct IdentityTable {
    users: BTreeMap<String, User>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// A table holding only the superuser
    pub fn with_root() -> Self {
        let mut table = IdentityTable::new();
        table.insert(User {
            name: "root".to_owned(),
            uid: 0,
            gid: 0,
            home: "/root".to_owned(),
            shell: "/bin/bash".to_owned(),
        });
        table
    }

    /// Read accounts from `/etc/passwd` text. Malformed lines are skipped.
    pub fn parse_passwd(text: &str) -> Self {
        let mut table = IdentityTable::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            if line.starts_with('#') || fields.len() != 7 {
                continue;
            }
            match (fields[2].parse(), fields[3].parse()) {
                (Ok(uid), Ok(gid)) => {
                    table.insert(User {
                        name: fields[0].to_owned(),
                        uid,
                        gid,
                        home: fields[5].to_owned(),
                        shell: fields[6].to_owned(),
                    });
                }
                _ => log::debug!("skipping passwd line {:?}", line),
            }
        }
        table
    }

    /// Add or replace an account
    pub fn insert(&mut self, user: User) -> Option<User> {
        self.users.insert(user.name.clone(), user)
    }

    pub fn lookup(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn lookup_uid(&self, uid: u32) -> Option<&User> {
        self.users.values().find(|user| user.uid == uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }
}

impl From<Vec<User>> for IdentityTable {
    fn from(users: Vec<User>) -> Self {
        let mut table = IdentityTable::new();
        for user in users {
            table.insert(user);
        }
        table
    }
}

impl From<IdentityTable> for Vec<User> {
    fn from(table: IdentityTable) -> Self {
        table.users.into_iter().map(|(_, user)| user).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwd_lines() {
        let table = IdentityTable::parse_passwd(
            "root:x:0:0:root:/root:/bin/bash\n\
             # comment\n\
             broken:x:zero:0::/:/bin/sh\n\
             short:x:1\n\
             www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin\n",
        );
        assert_eq!(table.iter().count(), 2);
        assert!(table.lookup("root").unwrap().is_root());
        let www = table.lookup("www-data").unwrap();
        assert_eq!((www.uid, www.gid), (33, 33));
        assert_eq!(www.home, "/var/www");
        assert_eq!(table.lookup_uid(33).unwrap().name, "www-data");
        assert!(table.lookup("broken").is_none());
    }

    #[test]
    fn serde_as_a_list() {
        let table = IdentityTable::with_root();
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.starts_with("[{\"name\":\"root\""));
        let back: IdentityTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
