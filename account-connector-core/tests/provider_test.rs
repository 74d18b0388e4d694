//! Provider contract tests
//!
//! Covers how provider payloads are read and written:
//! - connect requests only carry the credential fields that apply
//! - checkpoints keep unknown provider fields verbatim
//! - remote accounts count as validated once any source is OK
//! - solve error bodies recognise the expired-intent error

use account_connector_core::provider::AUTHENTICATION_INTENT_ERROR;
use account_connector_core::{
    AccountSource, Checkpoint, CheckpointType, ConnectRequest, ConnectResponse, Credentials,
    Provider, RemoteAccount, SolveCheckpointResponse,
};
use serde_json::{json, Value};

// =============================================================================
// Connect requests
// =============================================================================

mod connect_request {
    use super::*;

    #[test]
    fn test_password_credentials_omit_token_fields() {
        let credentials = Credentials::Password {
            username: "member@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        let request = ConnectRequest::new(Provider::Linkedin, &credentials);

        let body: Value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "provider": "LINKEDIN",
                "username": "member@example.com",
                "password": "hunter22"
            })
        );
    }

    #[test]
    fn test_access_token_credentials_carry_user_agent() {
        let credentials = Credentials::AccessToken {
            access_token: "li_at=abc".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
        };
        let request = ConnectRequest::new(Provider::Linkedin, &credentials);

        let body: Value = serde_json::to_value(&request).unwrap();
        assert_eq!(body["access_token"], "li_at=abc");
        assert_eq!(body["user_agent"], "Mozilla/5.0");
        assert!(body.get("username").is_none());
        assert!(body.get("password").is_none());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let credentials = Credentials::Password {
            username: "member@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        let request = ConnectRequest::new(Provider::Linkedin, &credentials);

        assert!(!format!("{:?}", credentials).contains("hunter22"));
        assert!(!format!("{:?}", request).contains("hunter22"));
        assert!(format!("{:?}", request).contains("member@example.com"));
    }
}

// =============================================================================
// Connect responses and checkpoints
// =============================================================================

mod checkpoints {
    use super::*;

    #[test]
    fn test_ready_account_has_no_checkpoint() {
        let response: ConnectResponse =
            serde_json::from_value(json!({"object": "AccountCreated", "account_id": "acc-1"}))
                .unwrap();

        assert_eq!(response.account_id, "acc-1");
        assert!(response.checkpoint.is_none());
    }

    #[test]
    fn test_checkpoint_keeps_provider_fields() {
        let response: ConnectResponse = serde_json::from_value(json!({
            "object": "Checkpoint",
            "account_id": "acc-1",
            "checkpoint": {"type": "2FA", "source": "APP", "phone_hint": "+33 6** ** ** 12"}
        }))
        .unwrap();

        let checkpoint = response.checkpoint.unwrap();
        assert_eq!(checkpoint.checkpoint_type, CheckpointType::TwoFactor);
        assert_eq!(checkpoint.source.as_deref(), Some("APP"));
        assert_eq!(checkpoint.extra["phone_hint"], "+33 6** ** ** 12");

        // Serializing gives back the same payload
        let stored = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(
            stored,
            json!({"type": "2FA", "source": "APP", "phone_hint": "+33 6** ** ** 12"})
        );
    }

    #[test]
    fn test_unknown_checkpoint_type_is_rejected() {
        let result: Result<Checkpoint, _> = serde_json::from_value(json!({"type": "SELFIE"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_checkpoint_type_names() {
        for name in ["2FA", "OTP", "IN_APP_VALIDATION", "CAPTCHA", "PHONE_REGISTER"] {
            let parsed = CheckpointType::from_str(name).unwrap();
            assert_eq!(parsed.as_str(), name);
            assert_eq!(parsed.to_string(), name);
        }
        assert_eq!(CheckpointType::from_str("otp"), None);
    }

    #[test]
    fn test_only_in_app_validation_resolves_out_of_band() {
        assert!(CheckpointType::InAppValidation.resolves_out_of_band());
        assert!(!CheckpointType::Otp.resolves_out_of_band());
        assert!(!CheckpointType::TwoFactor.resolves_out_of_band());
        assert!(!CheckpointType::Captcha.resolves_out_of_band());
        assert!(!CheckpointType::PhoneRegister.resolves_out_of_band());
    }
}

// =============================================================================
// Remote account status
// =============================================================================

mod remote_status {
    use super::*;

    fn account_with_sources(statuses: &[&str]) -> RemoteAccount {
        RemoteAccount {
            id: "acc-2".to_string(),
            object: None,
            name: None,
            account_type: Some("LINKEDIN".to_string()),
            created_at: None,
            sources: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| AccountSource {
                    id: format!("acc-2_{}", i),
                    status: status.to_string(),
                })
                .collect(),
            groups: vec![],
        }
    }

    #[test]
    fn test_any_ok_source_validates() {
        assert!(account_with_sources(&["CONNECTING", "OK"]).is_validated());
        assert!(account_with_sources(&["OK"]).is_validated());
    }

    #[test]
    fn test_no_ok_source_does_not_validate() {
        assert!(!account_with_sources(&[]).is_validated());
        assert!(!account_with_sources(&["CONNECTING", "CREDENTIALS"]).is_validated());
    }

    #[test]
    fn test_decodes_provider_payload() {
        let account: RemoteAccount = serde_json::from_value(json!({
            "object": "Account",
            "id": "acc-2",
            "name": "Jane Doe",
            "type": "LINKEDIN",
            "created_at": "2026-01-01T00:00:00.000Z",
            "connection_params": {"im": {"id": "xyz"}},
            "sources": [{"id": "acc-2_MAILING", "status": "OK"}],
            "groups": []
        }))
        .unwrap();

        assert_eq!(account.account_type.as_deref(), Some("LINKEDIN"));
        assert!(account.is_validated());
    }
}

// =============================================================================
// Solve responses
// =============================================================================

mod solve_response {
    use super::*;

    #[test]
    fn test_recognises_expired_intent() {
        let response: SolveCheckpointResponse = serde_json::from_value(json!({
            "status": 400,
            "type": AUTHENTICATION_INTENT_ERROR,
            "title": "Authentication intent error",
            "detail": "The authentication intent has expired"
        }))
        .unwrap();

        assert!(response.is_authentication_intent_error());
    }

    #[test]
    fn test_other_errors_are_not_expired_intent() {
        let response: SolveCheckpointResponse = serde_json::from_value(json!({
            "status": 500,
            "type": "errors/unexpected_error"
        }))
        .unwrap();

        assert!(!response.is_authentication_intent_error());
        assert!(!SolveCheckpointResponse::default().is_authentication_intent_error());
    }

    #[test]
    fn test_provider_names_parse_case_insensitively() {
        assert_eq!(Provider::from_str("linkedin"), Some(Provider::Linkedin));
        assert_eq!(Provider::from_str("LINKEDIN"), Some(Provider::Linkedin));
        assert_eq!(Provider::from_str("myspace"), None);
        assert_eq!(Provider::Telegram.to_string(), "TELEGRAM");
    }
}
