use std::collections::{BTreeMap, HashMap};
use serde_json::{Map, Value};

/// Serialized entity keyed by id
pub type Snapshot = BTreeMap<u64, Map<String, Value>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// Every entity; clients replace their mirror
    Full(Vec<Value>),
    /// Changed fields only, each patch carrying its `id`
    Delta(Vec<Value>),
}

/// Full/delta state machine for one broadcast channel (players or props).
///
/// On the full cadence (or when forced) the whole snapshot goes out and
/// becomes the baseline. In between, only fields whose value differs from
/// the baseline are sent, and entities with no changes are left out.
#[derive(Debug)]
pub struct DeltaChannel {
    full_interval_secs: f64,
    last_full: Option<f64>,
    force_full: bool,
    baseline: HashMap<u64, Map<String, Value>>,
}

impl DeltaChannel {
    pub fn new(full_interval_secs: f64) -> Self {
        Self {
            full_interval_secs,
            last_full: None,
            force_full: true,
            baseline: HashMap::new(),
        }
    }

    pub fn is_full_due(&self, now: f64) -> bool {
        self.force_full || self.last_full.map_or(true, |at| now - at >= self.full_interval_secs)
    }

    /// Next emission is a full snapshot
    pub fn request_full(&mut self) {
        self.force_full = true;
    }

    /// Drop an entity from the baseline. Deltas cannot express removal,
    /// so the next emission is a full snapshot.
    pub fn forget(&mut self, id: u64) {
        if self.baseline.remove(&id).is_some() || self.last_full.is_some() {
            self.force_full = true;
        }
    }

    /// Build this tick's payload from an already serialized snapshot and
    /// advance the baseline. Returns None when a delta would be empty.
    pub fn emit(&mut self, snapshot: Snapshot, now: f64) -> Option<Emission> {
        if self.is_full_due(now) {
            let payload = snapshot.values().cloned().map(Value::Object).collect();
            self.baseline = snapshot.into_iter().collect();
            self.last_full = Some(now);
            self.force_full = false;
            return Some(Emission::Full(payload));
        }

        let mut patches = Vec::new();
        for (id, current) in snapshot {
            match self.baseline.get_mut(&id) {
                Some(last) => {
                    let patch = diff_fields(last, &current);
                    if patch.is_empty() {
                        continue;
                    }
                    let mut object = Map::with_capacity(patch.len() + 1);
                    object.insert("id".to_string(), Value::from(id));
                    for (key, value) in patch {
                        last.insert(key.clone(), value.clone());
                        object.insert(key, value);
                    }
                    patches.push(Value::Object(object));
                }
                None => {
                    patches.push(Value::Object(current.clone()));
                    self.baseline.insert(id, current);
                }
            }
        }

        if patches.is_empty() {
            None
        } else {
            Some(Emission::Delta(patches))
        }
    }

    pub fn baseline_len(&self) -> usize {
        self.baseline.len()
    }
}

/// Fields of `current` whose value differs from `last` (exact comparison)
fn diff_fields(last: &Map<String, Value>, current: &Map<String, Value>) -> Vec<(String, Value)> {
    current
        .iter()
        .filter(|(key, value)| last.get(key.as_str()) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Serialize entities into a snapshot, skipping any that are not JSON objects
pub fn snapshot_of<'a, T, I>(entities: I) -> Result<Snapshot, serde_json::Error>
where
    T: serde::Serialize + 'a,
    I: IntoIterator<Item = (u64, &'a T)>,
{
    let mut snapshot = Snapshot::new();
    for (id, entity) in entities {
        if let Value::Object(map) = serde_json::to_value(entity)? {
            snapshot.insert(id, map);
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(entries: &[(u64, Value)]) -> Snapshot {
        entries
            .iter()
            .map(|(id, value)| (*id, value.as_object().cloned().unwrap()))
            .collect()
    }

    /// What a client does with the stream
    fn apply(mirror: &mut BTreeMap<u64, Map<String, Value>>, emission: &Emission) {
        match emission {
            Emission::Full(all) => {
                mirror.clear();
                for value in all {
                    let object = value.as_object().unwrap().clone();
                    mirror.insert(object["id"].as_u64().unwrap(), object);
                }
            }
            Emission::Delta(patches) => {
                for patch in patches {
                    let patch = patch.as_object().unwrap();
                    let entry = mirror.entry(patch["id"].as_u64().unwrap()).or_default();
                    for (key, value) in patch {
                        entry.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_emission_is_full() {
        let mut channel = DeltaChannel::new(5.0);
        let emission = channel.emit(snapshot(&[(1, json!({"id": 1, "x": 0}))]), 0.0);
        assert!(matches!(emission, Some(Emission::Full(ref all)) if all.len() == 1));
        assert_eq!(channel.baseline_len(), 1);
    }

    #[test]
    fn test_delta_only_changed_fields() {
        let mut channel = DeltaChannel::new(5.0);
        channel.emit(snapshot(&[(1, json!({"id": 1, "x": 0, "y": 0})), (2, json!({"id": 2, "x": 0}))]), 0.0);

        let emission = channel.emit(snapshot(&[(1, json!({"id": 1, "x": 3, "y": 0})), (2, json!({"id": 2, "x": 0}))]), 1.0);
        assert_eq!(emission, Some(Emission::Delta(vec![json!({"id": 1, "x": 3})])));

        // nothing changed since
        assert_eq!(channel.emit(snapshot(&[(1, json!({"id": 1, "x": 3, "y": 0}))]), 2.0), None);
    }

    #[test]
    fn test_new_entity_sent_whole() {
        let mut channel = DeltaChannel::new(5.0);
        channel.emit(Snapshot::new(), 0.0);
        let emission = channel.emit(snapshot(&[(9, json!({"id": 9, "name": "possum"}))]), 1.0);
        assert_eq!(emission, Some(Emission::Delta(vec![json!({"id": 9, "name": "possum"})])));
    }

    #[test]
    fn test_full_cadence_and_forget() {
        let mut channel = DeltaChannel::new(5.0);
        let one = snapshot(&[(1, json!({"id": 1}))]);
        channel.emit(one.clone(), 0.0);
        assert!(!channel.is_full_due(4.9));
        assert!(channel.is_full_due(5.0));

        channel.emit(one, 5.0);
        channel.forget(1);
        assert!(channel.is_full_due(5.1));
        assert_eq!(channel.emit(Snapshot::new(), 5.1), Some(Emission::Full(Vec::new())));
    }

    #[test]
    fn test_mirror_matches_full_after_deltas() {
        let mut channel = DeltaChannel::new(100.0);
        let mut mirror = BTreeMap::new();

        let frames = [
            snapshot(&[(1, json!({"id": 1, "x": 0.0, "hp": 100})), (2, json!({"id": 2, "x": 1.0, "hp": 100}))]),
            snapshot(&[(1, json!({"id": 1, "x": 0.5, "hp": 100})), (2, json!({"id": 2, "x": 1.0, "hp": 80}))]),
            snapshot(&[(1, json!({"id": 1, "x": 0.5, "hp": 100})), (2, json!({"id": 2, "x": 1.0, "hp": 80}))]),
            snapshot(&[
                (1, json!({"id": 1, "x": 2.0, "hp": 60})),
                (2, json!({"id": 2, "x": 1.0, "hp": 80})),
                (3, json!({"id": 3, "x": 7.0, "hp": 100})),
            ]),
        ];

        for (tick, frame) in frames.iter().enumerate() {
            if let Some(emission) = channel.emit(frame.clone(), tick as f64) {
                apply(&mut mirror, &emission);
            }
        }
        assert_eq!(&mirror, frames.last().unwrap());

        let mut fresh = DeltaChannel::new(100.0);
        let mut refetched = BTreeMap::new();
        apply(&mut refetched, &fresh.emit(frames[3].clone(), 10.0).unwrap());
        assert_eq!(mirror, refetched);
    }

    #[test]
    fn test_snapshot_of() {
        #[derive(serde::Serialize)]
        struct Thing {
            id: u64,
        }
        let things = [Thing { id: 4 }];
        let snap = snapshot_of(things.iter().map(|t| (t.id, t))).unwrap();
        assert_eq!(snap[&4]["id"], 4);
    }
}
