#![no_main]

use courier::{DemMemoryStream, Parser, Settings};
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must never panic the parser; errors are fine.
fuzz_target!(|data: &[u8]| {
    let mut image = b"PBUFDEM\0\0\0\0\0".to_vec();
    image.extend_from_slice(data);
    if let Ok(stream) = DemMemoryStream::from_bytes(image, "fuzz".into()) {
        let mut settings = Settings::default();
        settings.forward_dem = true;
        settings.forward_net = true;
        let mut parser = Parser::new(stream, settings);
        let _ = parser.run();
    }
});
