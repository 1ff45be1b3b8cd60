#![no_main]

use libfuzzer_sys::fuzz_target;

use livepoll::polls::{NewPoll, DEFAULT_MAX_QUESTION_LENGTH, MIN_OPTIONS};

// Any create_poll payload either fails validation or yields a draft that
// honors the creation limits.
fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<NewPoll>(data) else {
        return;
    };
    let Ok(valid) = request.validate(DEFAULT_MAX_QUESTION_LENGTH) else {
        return;
    };
    let poll = valid.into_draft(chrono::Utc::now());
    assert!(poll.options.len() >= MIN_OPTIONS);
    assert!(poll.duration >= 1);
    assert!(!poll.question.trim().is_empty());
    assert!(poll.question.chars().count() <= DEFAULT_MAX_QUESTION_LENGTH);
    assert_eq!(poll.total_votes, 0);
});
