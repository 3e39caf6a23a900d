#![no_main]

use flowpost_aggregator::{ReverseMap, Rules, synthesize};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(toml_str) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(rules) = Rules::parse(toml_str) else {
        return;
    };
    // 검증을 통과한 규칙은 합성과 대응표 구성에서 패닉하지 않아야 함
    for rule in &rules.rules {
        if let Ok(layout) = synthesize(rule)
            && rule.biflow_aggregation
        {
            let _ = ReverseMap::build(&layout.info);
        }
    }
});
