#![no_main]
use libfuzzer_sys::fuzz_target;
use memtrace_membrane::TraceRecord;

fuzz_target!(|data: &[u8]| {
    let Ok(record) = serde_json::from_slice::<TraceRecord>(data) else {
        return;
    };
    let line = serde_json::to_string(&record).expect("records serialize");
    let back: TraceRecord = serde_json::from_str(&line).expect("own output parses");
    assert_eq!(back, record);
});
