//! Typed properties on users and groups.
//!
//! Each property name carries a value-coercer: flag properties are pure
//! presence, the rest coerce to a string or integer. The set layer
//! rejects unknown names and uncoercible values, so a stored property is
//! always well-typed.

use std::collections::BTreeMap;
use std::fmt;

use crate::{
    errors::PropertyError,
    store::{PropertyRow, StoreOp, StoreSink},
    unix_time,
};

/// Value shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Pure presence; no value.
    Flag,
    /// Free-form string.
    Str,
    /// Integer.
    Int,
}

/// Which entity family a property set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyScope {
    /// Attached to a user.
    User,
    /// Attached to a group.
    Group,
}

const USER_PROPERTIES: &[(&str, PropertyKind)] = &[
    ("private", PropertyKind::Flag),
    ("wallops", PropertyKind::Flag),
    ("banned", PropertyKind::Int),
];

const GROUP_PROPERTIES: &[(&str, PropertyKind)] = &[
    ("private", PropertyKind::Flag),
    ("invite", PropertyKind::Str),
    ("topic", PropertyKind::Str),
];

fn kind_of(scope: PropertyScope, name: &str) -> Option<PropertyKind> {
    let table = match scope {
        PropertyScope::User => USER_PROPERTIES,
        PropertyScope::Group => GROUP_PROPERTIES,
    };
    table.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
}

/// A coerced property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Flag presence.
    Flag,
    /// String value.
    Str(String),
    /// Integer value.
    Int(i64),
}

impl PropertyValue {
    /// Wire form of the value; flags render as `*`.
    pub fn as_wire(&self) -> String {
        match self {
            Self::Flag => "*".to_string(),
            Self::Str(s) => s.clone(),
            Self::Int(n) => n.to_string(),
        }
    }

    /// Storage form; `None` for flags.
    pub fn as_stored(&self) -> Option<String> {
        match self {
            Self::Flag => None,
            Self::Str(s) => Some(s.clone()),
            Self::Int(n) => Some(n.to_string()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

/// One property with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEntry {
    /// Coerced value.
    pub value: PropertyValue,
    /// Handle of the setting user.
    pub setter: Option<String>,
    /// Set time, seconds since the epoch.
    pub time: u64,
}

fn coerce(
    scope: PropertyScope,
    name: &str,
    value: Option<&str>,
) -> Result<PropertyValue, PropertyError> {
    let kind = kind_of(scope, name).ok_or_else(|| PropertyError::Invalid(name.to_string()))?;
    match kind {
        PropertyKind::Flag => Ok(PropertyValue::Flag),
        PropertyKind::Str => value
            .map(|v| PropertyValue::Str(v.to_string()))
            .ok_or_else(|| PropertyError::Value(name.to_string())),
        PropertyKind::Int => value
            .and_then(|v| v.parse::<i64>().ok())
            .map(PropertyValue::Int)
            .ok_or_else(|| PropertyError::Value(name.to_string())),
    }
}

/// The property map attached to one user or group.
#[derive(Debug)]
pub struct PropertySet {
    owner: String,
    scope: PropertyScope,
    map: BTreeMap<String, PropertyEntry>,
    sink: StoreSink,
}

impl PropertySet {
    /// An empty set for `owner` (case-folded name).
    pub fn new(owner: impl Into<String>, scope: PropertyScope, sink: StoreSink) -> Self {
        Self { owner: owner.into(), scope, map: BTreeMap::new(), sink }
    }

    /// Populate from storage rows without re-persisting them.
    pub fn from_rows(
        owner: impl Into<String>,
        scope: PropertyScope,
        sink: StoreSink,
        rows: &[PropertyRow],
    ) -> Self {
        let mut set = Self::new(owner, scope, sink);
        for row in rows {
            match coerce(scope, &row.property, row.value.as_deref()) {
                Ok(value) => {
                    set.map.insert(row.property.clone(), PropertyEntry {
                        value,
                        setter: row.setter.clone(),
                        time: row.timestamp,
                    });
                },
                Err(_) => {
                    tracing::warn!(
                        owner = %set.owner,
                        property = %row.property,
                        "skipping malformed property row"
                    );
                },
            }
        }
        set
    }

    /// Whether the property is set.
    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// The entry, if set.
    pub fn get(&self, name: &str) -> Option<&PropertyEntry> {
        self.map.get(name)
    }

    /// Set a property, inserting or replacing (upsert).
    pub fn add_or_set(
        &mut self,
        name: &str,
        value: Option<&str>,
        setter: Option<String>,
    ) -> Result<(), PropertyError> {
        let value = coerce(self.scope, name, value)?;
        let entry = PropertyEntry { value, setter, time: unix_time() };

        self.sink.send(match self.scope {
            PropertyScope::User => StoreOp::UserPropertySet {
                name: self.owner.clone(),
                property: name.to_string(),
                value: entry.value.as_stored(),
                setter: entry.setter.clone(),
            },
            PropertyScope::Group => StoreOp::GroupPropertySet {
                group: self.owner.clone(),
                property: name.to_string(),
                value: entry.value.as_stored(),
                setter: entry.setter.clone(),
            },
        });
        self.map.insert(name.to_string(), entry);
        Ok(())
    }

    /// Insert a property that must not already be set.
    pub fn add(
        &mut self,
        name: &str,
        value: Option<&str>,
        setter: Option<String>,
    ) -> Result<(), PropertyError> {
        if self.map.contains_key(name) {
            return Err(PropertyError::Invalid(name.to_string()));
        }
        self.add_or_set(name, value, setter)
    }

    /// Update a property that must already be set.
    pub fn set(
        &mut self,
        name: &str,
        value: Option<&str>,
        setter: Option<String>,
    ) -> Result<(), PropertyError> {
        if !self.map.contains_key(name) {
            return Err(PropertyError::DoesNotExist);
        }
        self.add_or_set(name, value, setter)
    }

    /// Remove a property.
    pub fn delete(&mut self, name: &str) -> Result<(), PropertyError> {
        if self.map.remove(name).is_none() {
            return Err(PropertyError::DoesNotExist);
        }

        self.sink.send(match self.scope {
            PropertyScope::User => StoreOp::UserPropertyDel {
                name: self.owner.clone(),
                property: name.to_string(),
            },
            PropertyScope::Group => StoreOp::GroupPropertyDel {
                group: self.owner.clone(),
                property: name.to_string(),
            },
        });
        Ok(())
    }

    /// All entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyEntry)> {
        self.map.iter().map(|(n, e)| (n.as_str(), e))
    }

    /// Number of set properties.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no properties are set.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_set() -> PropertySet {
        PropertySet::new("alice", PropertyScope::User, StoreSink::disconnected())
    }

    fn group_set() -> PropertySet {
        PropertySet::new("#room", PropertyScope::Group, StoreSink::disconnected())
    }

    #[test]
    fn flag_property_ignores_value() {
        let mut props = user_set();
        props.add_or_set("private", Some("whatever"), None).unwrap();
        assert_eq!(props.get("private").unwrap().value, PropertyValue::Flag);
        assert_eq!(props.get("private").unwrap().value.as_wire(), "*");
    }

    #[test]
    fn int_property_coerces_or_rejects() {
        let mut props = user_set();
        props.add_or_set("banned", Some("1700000000"), None).unwrap();
        assert_eq!(props.get("banned").unwrap().value, PropertyValue::Int(1_700_000_000));

        assert!(matches!(
            props.add_or_set("banned", Some("soon"), None),
            Err(PropertyError::Value(_))
        ));
        assert!(matches!(props.add_or_set("banned", None, None), Err(PropertyError::Value(_))));
    }

    #[test]
    fn unknown_property_rejected() {
        let mut props = group_set();
        assert!(matches!(
            props.add_or_set("frobnicate", Some("x"), None),
            Err(PropertyError::Invalid(_))
        ));
        // User-scope names are not valid on groups.
        assert!(matches!(
            props.add_or_set("wallops", None, None),
            Err(PropertyError::Invalid(_))
        ));
    }

    #[test]
    fn set_requires_presence_and_delete_removes() {
        let mut props = group_set();
        assert!(matches!(props.set("topic", Some("hi"), None), Err(PropertyError::DoesNotExist)));

        props.add("topic", Some("hi"), Some("alice".into())).unwrap();
        props.set("topic", Some("updated"), None).unwrap();
        assert_eq!(
            props.get("topic").unwrap().value,
            PropertyValue::Str("updated".to_string())
        );

        props.delete("topic").unwrap();
        assert!(matches!(props.delete("topic"), Err(PropertyError::DoesNotExist)));
    }

    #[test]
    fn mutations_enqueue_store_ops() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut props = PropertySet::new("#room", PropertyScope::Group, StoreSink::new(tx));

        props.add_or_set("invite", Some("ask-first"), Some("alice".into())).unwrap();
        props.delete("invite").unwrap();

        match rx.try_recv().unwrap() {
            StoreOp::GroupPropertySet { group, property, value, setter } => {
                assert_eq!(group, "#room");
                assert_eq!(property, "invite");
                assert_eq!(value.as_deref(), Some("ask-first"));
                assert_eq!(setter.as_deref(), Some("alice"));
            },
            other => panic!("unexpected op {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), StoreOp::GroupPropertyDel { .. }));
    }

    mod coercion {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn banned_coerces_every_integer(n in any::<i64>()) {
                let mut props = user_set();
                let written = n.to_string();
                props.add_or_set("banned", Some(written.as_str()), None).unwrap();

                let entry = props.get("banned").unwrap();
                prop_assert_eq!(&entry.value, &PropertyValue::Int(n));
                prop_assert_eq!(entry.value.as_wire(), written.clone());
                prop_assert_eq!(entry.value.as_stored(), Some(written));
            }

            #[test]
            fn non_numeric_values_are_rejected(s in "[a-zA-Z ]{1,16}") {
                let mut props = user_set();
                prop_assert!(matches!(
                    props.add_or_set("banned", Some(s.as_str()), None),
                    Err(PropertyError::Value(_))
                ));
            }
        }
    }
}
