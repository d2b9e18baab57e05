use std::collections::HashMap;

use crate::types::{ChangeRecord, RegistrationKey};

/// Keeps only the last record of every key, in input order.
///
/// Upstream is expected to send at most one record per key and run, but when it does not, the
/// record that came last describes the latest state. Survivors keep the relative order of their
/// positions in `records`. Returns the survivors and the number of records dropped.
pub fn collapse_duplicates(records: Vec<ChangeRecord>) -> (Vec<ChangeRecord>, u64) {
    let mut last_index: HashMap<RegistrationKey, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        last_index.insert(record.key().clone(), index);
    }

    let collapsed = (records.len() - last_index.len()) as u64;
    if collapsed == 0 {
        return (records, 0);
    }

    let survivors = records
        .into_iter()
        .enumerate()
        .filter(|(index, record)| last_index.get(record.key()) == Some(index))
        .map(|(_, record)| record)
        .collect();

    (survivors, collapsed)
}
