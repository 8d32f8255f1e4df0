use serde_json::Value;
use joblink::error::{exit_codes, Error, JsonError, UNIQUE_VIOLATION_CODE};
use joblink::notice::{Notice, NoticeLevel};

#[test]
fn exit_code_user_error() {
    let err = Error::Validation("link is required".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    assert_eq!(Error::MissingEnv("JOBLINK_BACKEND_URL").exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn exit_code_policy_blocked() {
    let err = Error::PriorityLocked("12".to_string());
    assert_eq!(err.exit_code(), exit_codes::POLICY_BLOCKED);
    assert_eq!(Error::NotSignedIn.exit_code(), exit_codes::POLICY_BLOCKED);
}

#[test]
fn exit_code_operation_failed() {
    let err = Error::from_backend(500, None, "boom");
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn unique_violation_is_a_soft_success() {
    let err = Error::from_backend(409, Some(UNIQUE_VIOLATION_CODE.to_string()), "duplicate key");
    assert!(matches!(err, Error::AlreadyRecorded(_)));
    assert_eq!(err.exit_code(), exit_codes::SUCCESS);
    assert_eq!(Notice::from_error(&err).level, NoticeLevel::Info);
}

#[test]
fn details_include_backend_fields() {
    let err = Error::from_backend(401, Some("PGRST301".to_string()), "JWT expired");
    let details = err.details().expect("details");
    assert_eq!(details["status"], Value::from(401));
    assert_eq!(details["code"], Value::String("PGRST301".to_string()));
    assert_eq!(details["message"], Value::String("JWT expired".to_string()));
}

#[test]
fn json_error_includes_details() {
    let err = Error::MissingEnv("JOBLINK_BACKEND_KEY");
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    let details = json.details.expect("details");
    assert_eq!(details["variable"], Value::String("JOBLINK_BACKEND_KEY".to_string()));
}
