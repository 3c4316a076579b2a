#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use revtrie::data::Record;
use revtrie::log::{LogKey, LogValue, TransactionLog};
use revtrie::store::Page;

#[derive(Arbitrary, Debug)]
struct LogInput {
    capacity: u8,
    operations: Vec<LogOp>,
}

#[derive(Arbitrary, Debug)]
enum LogOp {
    Put { seq: u16, slot: u8, value: Vec<u8> },
    Get { seq: u16 },
    Flush,
}

fuzz_target!(|input: LogInput| {
    if input.operations.len() > 200 {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut log = TransactionLog::with_capacity(input.capacity as usize, dir.path()).unwrap();
    let mut expected: BTreeMap<LogKey, LogValue> = BTreeMap::new();

    for op in input.operations {
        match op {
            LogOp::Put { seq, slot, value } => {
                if value.len() > 256 {
                    continue;
                }
                let mut page = Page::new_data(1);
                page.records_mut().unwrap().set(slot as usize % 128, Record::new(&value));
                let key = LogKey::data(seq as u64);
                let value = LogValue::new(page, None);
                log.put(key, value.clone()).unwrap();
                expected.insert(key, value);
            }
            LogOp::Get { seq } => {
                let key = LogKey::data(seq as u64);
                assert_eq!(log.get(&key).unwrap(), expected.get(&key).cloned());
            }
            LogOp::Flush => log.flush().unwrap(),
        }
    }

    assert_eq!(log.len(), expected.len());
    let entries: Vec<_> = log.iter().unwrap().map(|entry| entry.unwrap()).collect();
    let model: Vec<_> = expected.into_iter().collect();
    assert_eq!(entries, model);
    log.close().unwrap();
});
