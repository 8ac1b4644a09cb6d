// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signed HTTP API integration tests over a real listener.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

use arqanum_hub::accounts::AccountDirectory;
use arqanum_hub::freshness::unix_now;
use arqanum_hub::proof_of_work::{derive_account_id, solve};
use arqanum_hub::protocol::HubPayload;
use arqanum_hub::services::{FindContactRequest, RegisterRequest, UpdateProfileRequest};

use common::{connect_with, next_envelope, start_hub, test_config, TestAccount, TestHub};

async fn post_signed<T: Serialize>(
    hub: &TestHub,
    path: &str,
    account: &TestAccount,
    request: &T,
) -> (reqwest::StatusCode, Value) {
    let (body, signature) = account.signed_body(request);
    let response = reqwest::Client::new()
        .post(format!("{}{}", hub.api_url, path))
        .header("X-Signature", STANDARD.encode(signature))
        .body(body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    let text = response.text().await.unwrap();
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
}

/// Builds a self-signed registration for a fresh key.
fn registration(key_holder: &mut TestAccount) -> RegisterRequest {
    let public_key = key_holder.public_key();
    let account_id = derive_account_id(&public_key);
    key_holder.account_id = account_id.clone();
    let (proof, nonce) = solve(&STANDARD.encode(&public_key), 1, 100_000).expect("no proof found");
    RegisterRequest {
        account_id,
        signature_public_key: public_key,
        proof_of_work: proof,
        proof_of_work_nonce: nonce,
        captcha_token: "token".to_string(),
        timestamp: unix_now(),
    }
}

#[tokio::test]
async fn test_health() {
    let hub = start_hub(test_config()).await;
    let body: Value = reqwest::get(format!("{}/health", hub.api_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_then_connect() {
    let hub = start_hub(test_config()).await;
    let mut carol = TestAccount::generate("pending");
    let request = registration(&mut carol);

    let (status, body) = post_signed(&hub, "/api/account/register", &carol, &request).await;
    assert_eq!(status, 200);
    assert_eq!(body["account_id"], carol.account_id.as_str());
    assert_eq!(body["version"], 1);

    // The registered key authenticates a realtime connection
    let mut ws = connect_with(&hub.ws_url, Some(&carol.bearer())).await;
    assert!(matches!(
        next_envelope(&mut ws).await.map(|e| e.payload),
        Some(HubPayload::HandshakeAck(_))
    ));
}

#[tokio::test]
async fn test_register_twice_rejected() {
    let hub = start_hub(test_config()).await;
    let mut carol = TestAccount::generate("pending");
    let request = registration(&mut carol);

    let (first, _) = post_signed(&hub, "/api/account/register", &carol, &request).await;
    assert_eq!(first, 200);

    let again = RegisterRequest {
        timestamp: unix_now(),
        ..request
    };
    let (second, _) = post_signed(&hub, "/api/account/register", &carol, &again).await;
    assert_eq!(second, 400);
    assert_eq!(hub.hub.directory.account_count(), 1);
}

#[tokio::test]
async fn test_register_signed_by_other_key_rejected() {
    let hub = start_hub(test_config()).await;
    let mut carol = TestAccount::generate("pending");
    let request = registration(&mut carol);
    let mallory = TestAccount::generate("mallory");

    let (status, _) = post_signed(&hub, "/api/account/register", &mallory, &request).await;
    assert_eq!(status, 400);
    assert_eq!(hub.hub.directory.account_count(), 0);
}

#[tokio::test]
async fn test_profile_update_and_find() {
    let hub = start_hub(test_config()).await;
    let alice = TestAccount::generate("alice");
    let bob = TestAccount::generate("bob");
    alice.enroll(&hub);
    bob.enroll(&hub);

    let update = UpdateProfileRequest {
        account_id: "bob".to_string(),
        profile: b"bob's card".to_vec(),
        expected_version: Some(1),
        timestamp: unix_now(),
    };
    let (status, body) = post_signed(&hub, "/api/account/update-profile", &bob, &update).await;
    assert_eq!(status, 200);
    assert_eq!(body["version"], 2);

    // Stale expected version
    let (status, _) = post_signed(&hub, "/api/account/update-profile", &bob, &update).await;
    assert_eq!(status, 400);

    let find = FindContactRequest {
        account_id: "alice".to_string(),
        contact_id: "bob".to_string(),
        timestamp: unix_now(),
    };
    let (status, card) = post_signed(&hub, "/api/contact/find", &alice, &find).await;
    assert_eq!(status, 200);
    assert_eq!(card["account_id"], "bob");
    assert_eq!(card["profile"], STANDARD.encode(b"bob's card").as_str());
    assert_eq!(card["version"], 2);

    let missing = FindContactRequest {
        contact_id: "nobody".to_string(),
        ..find
    };
    let (status, card) = post_signed(&hub, "/api/contact/find", &alice, &missing).await;
    assert_eq!(status, 200);
    assert!(card.is_null());
}
