use truss_authz::{CheckRequest, ObjectRef, RelationTuple, Subject};
use truss_core::Context;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::store_client;

fn check_request() -> CheckRequest {
    CheckRequest {
        object: ObjectRef::new("tenancy", "t1/p1"),
        permission: "access".to_string(),
        subject: Subject::profile("user-1"),
    }
}

fn tuple() -> RelationTuple {
    RelationTuple {
        namespace: "tenancy".to_string(),
        object: "t1/p1".to_string(),
        relation: "access".to_string(),
        subject: Subject::profile("user-1"),
    }
}

/// Checks hit `/relation-tuples/check` with the full query shape.
#[tokio::test]
async fn check_encodes_the_query_and_reads_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/check"))
        .and(query_param("namespace", "tenancy"))
        .and(query_param("object", "t1/p1"))
        .and(query_param("relation", "access"))
        .and(query_param("subject_id", "user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "allowed": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = store_client(&server);
    let result = client
        .check(&Context::background(), &check_request())
        .await
        .unwrap();
    assert!(result.allowed);
}

/// Subject sets travel as the three-part query shape.
#[tokio::test]
async fn check_encodes_subject_sets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/check"))
        .and(query_param("subject_set.namespace", "group"))
        .and(query_param("subject_set.object", "admins"))
        .and(query_param("subject_set.relation", "member"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "allowed": false
        })))
        .mount(&server)
        .await;

    let client = store_client(&server);
    let mut req = check_request();
    req.subject = Subject::Set {
        namespace: "group".to_string(),
        object: "admins".to_string(),
        relation: "member".to_string(),
    };
    let result = client.check(&Context::background(), &req).await.unwrap();
    assert!(!result.allowed);
}

/// A 403 from the store is a denial, not an error.
#[tokio::test]
async fn denied_body_maps_to_not_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/check"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = store_client(&server);
    let result = client
        .check(&Context::background(), &check_request())
        .await
        .unwrap();
    assert!(!result.allowed);
}

/// Batch checks run serially and collapse per-item faults to denials.
#[tokio::test]
async fn batch_check_fails_closed_per_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/check"))
        .and(query_param("object", "t1/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "allowed": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/check"))
        .and(query_param("object", "t2/p2"))
        .respond_with(ResponseTemplate::new(418))
        .mount(&server)
        .await;

    let client = store_client(&server);
    let mut broken = check_request();
    broken.object = ObjectRef::new("tenancy", "t2/p2");

    let results = client
        .batch_check(&Context::background(), &[check_request(), broken])
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].allowed);
    assert!(!results[1].allowed);
    assert!(results[1].reason.starts_with("check failed:"));
}

/// Writes PUT a singleton tuple list and accept 201.
#[tokio::test]
async fn write_tuple_puts_a_singleton_list() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/admin/relation-tuples"))
        .and(body_json(serde_json::json!({
            "relation_tuples": [
                {
                    "namespace": "tenancy",
                    "object": "t1/p1",
                    "relation": "access",
                    "subject_id": "user-1"
                }
            ]
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = store_client(&server);
    client
        .write_tuple(&Context::background(), &tuple())
        .await
        .unwrap();
}

/// Deleting an absent tuple is success (idempotent delete).
#[tokio::test]
async fn delete_treats_404_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/admin/relation-tuples"))
        .and(query_param("subject_id", "user-1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = store_client(&server);
    client
        .delete_tuple(&Context::background(), &tuple())
        .await
        .unwrap();
}

/// Listings decode the store's tuple shape, subject sets included.
#[tokio::test]
async fn list_relations_decodes_tuples() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples"))
        .and(query_param("namespace", "tenancy"))
        .and(query_param("object", "t1/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "relation_tuples": [
                {
                    "namespace": "tenancy",
                    "object": "t1/p1",
                    "relation": "access",
                    "subject_id": "user-1"
                },
                {
                    "namespace": "tenancy",
                    "object": "t1/p1",
                    "relation": "access",
                    "subject_set": {
                        "namespace": "group",
                        "object": "admins",
                        "relation": "member"
                    }
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = store_client(&server);
    let tuples = client
        .list_relations(&Context::background(), &ObjectRef::new("tenancy", "t1/p1"))
        .await
        .unwrap();

    assert_eq!(tuples.len(), 2);
    assert_eq!(tuples[0].subject, Subject::profile("user-1"));
    assert!(matches!(tuples[1].subject, Subject::Set { .. }));
}

/// Expand flattens subject ids (defaulted into the profile namespace)
/// and subject sets, at max depth 3.
#[tokio::test]
async fn expand_returns_both_subject_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/expand"))
        .and(query_param("max-depth", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "subject_ids": ["user-1", "user-2"],
            "subject_sets": [
                { "namespace": "group", "object": "admins", "relation": "member" }
            ]
        })))
        .mount(&server)
        .await;

    let client = store_client(&server);
    let subjects = client
        .expand(
            &Context::background(),
            &ObjectRef::new("tenancy", "t1/p1"),
            "access",
        )
        .await
        .unwrap();

    assert_eq!(subjects.len(), 3);
    assert_eq!(subjects[0], Subject::profile("user-1"));
    assert_eq!(subjects[1], Subject::profile("user-2"));
    assert!(matches!(subjects[2], Subject::Set { .. }));
}

/// A 5xx from the store is a service error, not a decision.
#[tokio::test]
async fn store_failure_is_service_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relation-tuples/check"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = store_client(&server);
    let err = client
        .check(&Context::background(), &check_request())
        .await
        .unwrap_err();
    assert_eq!(err.http_status().as_u16(), 500);
    assert_eq!(err.grpc_code(), tonic::Code::Internal);
}
