#![no_main]

use courier::StringTable;
use courier::messages::CsvcMsgCreateStringTable;
use libfuzzer_sys::fuzz_target;

// The delta decoder walks attacker-controlled bit soup; it may reject it
// but must never panic or overflow a buffer.
fuzz_target!(|data: &[u8]| {
    let msg = CsvcMsgCreateStringTable {
        name: "fuzz".to_string(),
        max_entries: 1024,
        num_entries: 64,
        user_data_fixed_size: data.first().is_some_and(|b| b & 1 == 1),
        user_data_size: 16,
        user_data_size_bits: 128,
        flags: 0,
        string_data: data.to_vec(),
    };
    let _ = StringTable::create(&msg);
});
