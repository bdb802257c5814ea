#![allow(missing_docs)]

use shared::Failure;

#[test]
fn ok_is_returned() {
    let result: Result<u32, String> = Ok(7);
    assert_eq!(result.or_log_and_panic("Should not panic"), 7);
}

#[test]
#[should_panic(expected = "Could not load: broken")]
fn err_panics_with_message() {
    let result: Result<u32, String> = Err("broken".to_string());
    result.or_log_and_panic("Could not load");
}
