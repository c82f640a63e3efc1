use std::collections::BTreeMap;

/// Key-value store keeping every version of every key, so state can be read and proven at any
/// past height.
#[derive(Clone, Debug, Default)]
pub struct VersionedStore {
    entries: BTreeMap<String, Vec<(u64, Option<Vec<u8>>)>>,
}

impl VersionedStore {
    pub fn set(&mut self, height: u64, key: impl Into<String>, value: Vec<u8>) {
        self.write(height, key.into(), Some(value));
    }

    pub fn delete(&mut self, height: u64, key: &str) {
        if self.get(key).is_some() {
            self.write(height, key.to_string(), None);
        }
    }

    fn write(&mut self, height: u64, key: String, value: Option<Vec<u8>>) {
        let versions = self.entries.entry(key).or_default();
        match versions.last_mut() {
            // several writes within one block keep the last one
            Some((h, v)) if *h == height => *v = value,
            _ => versions.push((height, value)),
        }
    }

    /// Latest value.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|(_, value)| value.as_deref())
    }

    /// Value as of the end of block `height`.
    pub fn get_at(&self, height: u64, key: &str) -> Option<&[u8]> {
        let versions = self.entries.get(key)?;
        let idx = versions.partition_point(|(h, _)| *h <= height);
        if idx == 0 {
            return None
        }
        versions[idx - 1].1.as_deref()
    }

    /// Live entries under `prefix` as of the end of block `height`, ordered by key.
    pub fn scan_at(&self, height: u64, prefix: &str) -> Vec<(&str, &[u8])> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, _)| self.get_at(height, key).map(|value| (key.as_str(), value)))
            .collect()
    }
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_be_bytes)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_at_past_heights() {
        let mut store = VersionedStore::default();
        store.set(2, "commitments/ports/p/channels/c/sequences/1", vec![1]);
        store.set(4, "commitments/ports/p/channels/c/sequences/2", vec![2]);
        store.delete(5, "commitments/ports/p/channels/c/sequences/1");

        let prefix = "commitments/ports/p/channels/c/sequences/";
        assert_eq!(store.scan_at(1, prefix).len(), 0);
        assert_eq!(store.scan_at(4, prefix).len(), 2);
        assert_eq!(store.scan_at(5, prefix).len(), 1);
        assert_eq!(store.get_at(3, "commitments/ports/p/channels/c/sequences/1"), Some(&[1u8][..]));
        assert_eq!(store.get("commitments/ports/p/channels/c/sequences/1"), None);
    }

    #[test]
    fn last_write_in_a_block_wins() {
        let mut store = VersionedStore::default();
        store.set(3, "nextSequenceSend/ports/p/channels/c", encode_u64(1));
        store.set(3, "nextSequenceSend/ports/p/channels/c", encode_u64(2));
        assert_eq!(decode_u64(store.get_at(3, "nextSequenceSend/ports/p/channels/c")), 2);
        assert_eq!(decode_u64(store.get_at(2, "nextSequenceSend/ports/p/channels/c")), 0);
    }
}
