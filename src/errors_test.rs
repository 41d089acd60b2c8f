use super::*;

#[test]
fn result_code_should_map_known_codes_both_ways() {
    for code in [0, -1, -4, -9, -100, -101, -103, -108, -110, -112, -116, -118] {
        let rc = ResultCode::from_code(code);
        assert!(!matches!(rc, ResultCode::Unknown(_)), "code {code} should be known");
        assert_eq!(rc.code(), code);
    }
}

#[test]
fn result_code_should_keep_unknown_values() {
    let rc = ResultCode::from(-4242);
    assert_eq!(rc, ResultCode::Unknown(-4242));
    assert_eq!(rc.code(), -4242);
}

#[test]
fn into_result_should_only_fail_for_non_ok_codes() {
    assert!(ResultCode::Ok.into_result().is_ok());

    match ResultCode::NoNode.into_result() {
        Err(Error::Keeper(ResultCode::NoNode)) => {}
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn handle_closed_is_recognised() {
    assert!(Error::HandleClosed.is_handle_closed());
    assert!(!Error::NotConnected.is_handle_closed());
}
