//! REST backend client against a wiremock server.

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use storefront_checkout::{
    backend::BackendApi,
    models::payment::CardBrand,
    models::transaction::{
        CreateTransactionRequest, CustomerSnapshot, DeliverySnapshot, PaymentMethodKind,
        PaymentMethodSummary, PaymentResultUpdate, TransactionStatus,
    },
    BackendError, RestBackendClient,
};
use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RestBackendClient {
    RestBackendClient::new(format!("{}/api/", server.uri()), Duration::from_secs(5)).unwrap()
}

fn create_request() -> CreateTransactionRequest {
    CreateTransactionRequest {
        customer: CustomerSnapshot {
            name: "Ana Gomez".into(),
            email: "ana@example.com".into(),
            phone: "+573001234567".into(),
        },
        product_id: "p-1".into(),
        quantity: 1,
        payment: PaymentMethodSummary {
            method: PaymentMethodKind::CreditCard,
            card_last_four: "4242".into(),
            card_brand: CardBrand::Visa,
        },
        delivery: DeliverySnapshot {
            address: "Calle 10 # 5-20".into(),
            city: "Bogota".into(),
            department: "Cundinamarca".into(),
            postal_code: "110111".into(),
            phone: "+573001234567".into(),
        },
    }
}

#[tokio::test]
async fn lists_available_products_with_paging() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(query_param("limit", "6"))
        .and(query_param("offset", "6"))
        .and(query_param("availableOnly", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "products": [{
                    "id": "p-7",
                    "name": "Desk lamp",
                    "description": "LED",
                    "price": 45000,
                    "stock": 4,
                    "isActive": true,
                    "isAvailable": true
                }],
                "pagination": { "total": 7, "hasMore": false, "limit": 6, "offset": 6 }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server).list_products(6, 6, true).await.unwrap();
    assert_eq!(page.products.len(), 1);
    assert_eq!(page.products[0].id, "p-7");
    assert_eq!(page.products[0].base_fee, None);
    assert_eq!(page.pagination.total, 7);
    assert!(!page.pagination.has_more);
}

#[tokio::test]
async fn numeric_product_ids_are_read_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "products": [
                    { "id": 1, "name": "Desk lamp", "price": 45000, "stock": 4 },
                    { "id": "p-2", "name": "Mug", "price": 12000, "stock": 9 }
                ],
                "pagination": { "total": 2, "hasMore": false }
            }
        })))
        .mount(&server)
        .await;

    let page = client(&server).list_products(6, 0, true).await.unwrap();
    let ids: Vec<&str> = page.products.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["1", "p-2"]);
}

#[tokio::test]
async fn fetches_one_product() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "product": {
                "id": "p-1", "name": "Wireless headphones", "price": 100000,
                "baseFee": 2000, "stock": 3
            }}
        })))
        .mount(&server)
        .await;

    let product = client(&server).get_product("p-1").await.unwrap();
    assert_eq!(product.base_fee, Some(2000));
    assert!(product.is_purchasable());
}

#[tokio::test]
async fn missing_product_is_not_found_with_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "success": false,
            "message": "Product not found"
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_product("nope").await.unwrap_err();
    assert!(err.is_not_found());
    assert_matches!(err, BackendError::Status { ref message, .. } if message == "Product not found");
}

#[tokio::test]
async fn non_json_failure_uses_status_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server).list_products(6, 0, true).await.unwrap_err();
    assert_matches!(
        err,
        BackendError::Status { status: 502, ref message } if message == "HTTP error! status: 502"
    );
}

#[tokio::test]
async fn stock_update_patches_the_new_level() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/products/p-1/stock"))
        .and(body_json(json!({ "stock": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).update_stock("p-1", 2).await.unwrap();
}

#[tokio::test]
async fn created_transaction_id_is_read_from_the_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/transactions"))
        .and(body_partial_json(json!({
            "productId": "p-1",
            "quantity": 1,
            "payment": { "method": "CREDIT_CARD", "cardLastFour": "4242", "cardBrand": "VISA" },
            "delivery": { "postalCode": "110111" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": { "transaction": { "id": "TX1", "status": "PENDING" } }
        })))
        .mount(&server)
        .await;

    let id = client(&server)
        .create_transaction(&create_request())
        .await
        .unwrap();
    assert_eq!(id, "TX1");
}

#[tokio::test]
async fn numeric_created_transaction_id_is_read_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/transactions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": { "transaction": { "id": 42, "status": "PENDING" } }
        })))
        .mount(&server)
        .await;

    let id = client(&server)
        .create_transaction(&create_request())
        .await
        .unwrap();
    assert_eq!(id, "42");
}

#[tokio::test]
async fn created_transaction_without_id_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/transactions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": { "transaction": {} }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_transaction(&create_request())
        .await
        .unwrap_err();
    assert_matches!(err, BackendError::MissingTransactionId);
}

#[tokio::test]
async fn unsuccessful_envelope_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Product out of stock"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_transaction(&create_request())
        .await
        .unwrap_err();
    assert_matches!(err, BackendError::Rejected(ref message) if message == "Product out of stock");
}

#[tokio::test]
async fn provider_result_is_posted_in_camel_case() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/payment/TX1/update-with-provider-result"))
        .and(body_partial_json(json!({
            "status": "APPROVED",
            "providerTransactionId": "prov-1",
            "reference": "TXN-TX1-1749981600000",
            "amount": 126000
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let update = PaymentResultUpdate {
        status: TransactionStatus::Approved,
        provider_transaction_id: "prov-1".into(),
        reference: "TXN-TX1-1749981600000".into(),
        message: "Payment approved successfully".into(),
        processed_at: Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
        amount: Some(126_000),
        currency: Some("COP".into()),
    };
    client(&server)
        .update_payment_result("TX1", &update)
        .await
        .unwrap();
}

#[tokio::test]
async fn payment_status_reads_the_recorded_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/payment/TX1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "transactionId": "TX1",
                "status": "DECLINED",
                "providerTransactionId": "prov-1"
            }
        })))
        .mount(&server)
        .await;

    let status = client(&server).payment_status("TX1").await.unwrap();
    assert_eq!(status.status, TransactionStatus::Declined);
    assert_eq!(status.provider_transaction_id.as_deref(), Some("prov-1"));
    assert_eq!(status.reference, None);
}

#[tokio::test]
async fn payment_status_reads_the_nested_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/payment/TX1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "transaction": { "id": "TX1", "status": "APPROVED" },
                "paymentStatus": {
                    "currentStatus": "APPROVED",
                    "providerInfo": { "id": "prov-1", "status": "APPROVED" }
                }
            }
        })))
        .mount(&server)
        .await;

    let status = client(&server).payment_status("TX1").await.unwrap();
    assert_eq!(status.transaction_id, "TX1");
    assert_eq!(status.status, TransactionStatus::Approved);
    assert_eq!(status.provider_transaction_id.as_deref(), Some("prov-1"));
}

#[tokio::test]
async fn payment_status_falls_back_to_the_requested_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/payment/TX9/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "paymentStatus": { "currentStatus": "COMPLETED" } }
        })))
        .mount(&server)
        .await;

    let status = client(&server).payment_status("TX9").await.unwrap();
    assert_eq!(status.transaction_id, "TX9");
    assert_eq!(status.status, TransactionStatus::Approved);
}

#[tokio::test]
async fn payment_status_without_a_known_status_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/payment/TX1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "transaction": { "id": "TX1", "status": "IN_REVIEW" } }
        })))
        .mount(&server)
        .await;

    let err = client(&server).payment_status("TX1").await.unwrap_err();
    assert_matches!(err, BackendError::MalformedResponse(ref m) if m.starts_with("payment_status"));
}
