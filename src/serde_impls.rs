use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use crate::HashTable;

impl<K, V, S> Serialize for HashTable<K, V, S>
where
    K: Serialize + Clone + Hash + Ord + Send + Sync,
    V: Serialize + Clone + Send + Sync,
    S: BuildHasher,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_map(
            self.snapshot()
                .into_iter()
                .flat_map(|(_, bucket)| bucket)
                .filter(|(_, _, marked)| !marked)
                .map(|(key, value, _)| (key, value)),
        )
    }
}

impl<'de, K, V, S> Deserialize<'de> for HashTable<K, V, S>
where
    K: Deserialize<'de> + Clone + Hash + Ord + Send + Sync,
    V: Deserialize<'de> + Clone + Send + Sync,
    S: Default + BuildHasher,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(TableVisitor::new())
    }
}

struct TableVisitor<K, V, S> {
    _marker: PhantomData<HashTable<K, V, S>>,
}

impl<K, V, S> TableVisitor<K, V, S> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<'de, K, V, S> Visitor<'de> for TableVisitor<K, V, S>
where
    K: Deserialize<'de> + Clone + Hash + Ord + Send + Sync,
    V: Deserialize<'de> + Clone + Send + Sync,
    S: Default + BuildHasher,
{
    type Value = HashTable<K, V, S>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let table = HashTable::default();

        while let Some((key, value)) = access.next_entry()? {
            table.insert(key, value);
        }

        Ok(table)
    }
}
