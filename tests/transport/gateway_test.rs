//! Tests for gateway target formatting.

use switchboard::transport::gateway::format_target;
use switchboard::transport::TransportError;

#[test]
fn formatting_strips_non_digits() {
    assert_eq!(
        format_target("+55 (11) 9999-0000", None).expect("format"),
        "551199990000"
    );
}

#[test]
fn country_code_is_prefixed_when_absent() {
    assert_eq!(format_target("119990000", Some("55")).expect("format"), "55119990000");
}

#[test]
fn country_code_is_not_duplicated() {
    assert_eq!(
        format_target("55119990000", Some("55")).expect("format"),
        "55119990000"
    );
}

#[test]
fn empty_country_code_is_a_no_op() {
    assert_eq!(format_target("119990000", Some("")).expect("format"), "119990000");
}

#[test]
fn digitless_targets_are_invalid() {
    assert!(matches!(
        format_target("not-a-phone", Some("55")),
        Err(TransportError::InvalidTarget(_))
    ));
    assert!(matches!(
        format_target("", None),
        Err(TransportError::InvalidTarget(_))
    ));
}
