mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{BOUNDARY, body_bytes, body_json, check_file, get, send_chunk, send_form, setup};
use tower::ServiceExt;

#[tokio::test]
async fn test_upload_flow() {
    let t = setup().await;

    // 1. First chunk opens a session
    let response = send_chunk(&t.app, "report.bin", b"AB", false).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = body_json(response).await;
    assert_eq!(ack["filename"], "report.bin");
    assert_eq!(ack["bytes_written"], 2);
    assert_eq!(ack["committed"], false);

    // 2. Name is taken while the upload is in progress, but not yet listed
    let (status, availability) = check_file(&t.app, "report.bin").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(availability["available"], false);

    let files = body_json(get(&t.app, "/files").await).await;
    assert_eq!(files["files"].as_array().unwrap().len(), 0);

    let sessions = body_json(get(&t.app, "/upload/sessions").await).await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["filename"], "report.bin");
    assert_eq!(sessions[0]["state"], "receiving");
    assert_eq!(sessions[0]["bytes_written"], 2);
    assert_eq!(sessions[0]["upload_id"], ack["upload_id"]);

    // 3. Last chunk commits
    let response = send_chunk(&t.app, "report.bin", b"CD", true).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = body_json(response).await;
    assert_eq!(ack["bytes_written"], 4);
    assert_eq!(ack["committed"], true);

    // 4. Visible and downloadable with the exact bytes
    let files = body_json(get(&t.app, "/files").await).await;
    assert_eq!(files["files"], serde_json::json!(["report.bin"]));

    let response = get(&t.app, "/files/report.bin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"ABCD");

    let on_disk = std::fs::read(t.state.config.upload_dir.join("report.bin")).unwrap();
    assert_eq!(on_disk, b"ABCD");

    // 5. No session or staging data left behind
    assert!(t.state.uploads.registry().is_empty());
    let staged = std::fs::read_dir(&t.state.config.staging_dir).unwrap().count();
    assert_eq!(staged, 0);
}

#[tokio::test]
async fn test_reupload_of_committed_name_is_rejected() {
    let t = setup().await;

    let response = send_chunk(&t.app, "a.txt", b"original", true).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send_chunk(&t.app, "a.txt", b"X", false).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "DUPLICATE_NAME");

    let response = send_chunk(&t.app, "a.txt", b"X", true).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = get(&t.app, "/files/a.txt").await;
    assert_eq!(body_bytes(response).await, b"original");
    assert!(t.state.uploads.registry().is_empty());
}

#[tokio::test]
async fn test_removed_committed_file_frees_its_name() {
    let t = setup().await;

    let response = send_chunk(&t.app, "gone.bin", b"AB", true).await;
    assert_eq!(response.status(), StatusCode::OK);
    let (status, _) = check_file(&t.app, "gone.bin").await;
    assert_eq!(status, StatusCode::CONFLICT);

    std::fs::remove_file(t.state.config.upload_dir.join("gone.bin")).unwrap();

    let files = body_json(get(&t.app, "/files").await).await;
    assert_eq!(files["files"].as_array().unwrap().len(), 0);
    let (status, body) = check_file(&t.app, "gone.bin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);

    let response = send_chunk(&t.app, "gone.bin", b"CD", true).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["committed"], true);
    assert_eq!(body_bytes(get(&t.app, "/files/gone.bin").await).await, b"CD");
}

#[tokio::test]
async fn test_upload_id_pins_chunks_to_their_session() {
    let t = setup().await;

    let ack = body_json(send_chunk(&t.app, "pinned.bin", b"AB", false).await).await;
    let upload_id = ack["upload_id"].as_str().unwrap().to_string();

    // A different upload cannot join the session
    let stranger = uuid::Uuid::new_v4().to_string();
    let response = send_form(
        &t.app,
        &[("filename", "pinned.bin"), ("uploadId", &stranger)],
        b"zz",
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "DUPLICATE_NAME");

    // The owner can
    let response = send_form(
        &t.app,
        &[
            ("filename", "pinned.bin"),
            ("isLastChunk", "true"),
            ("uploadId", &upload_id),
        ],
        b"CD",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["committed"], true);
    assert_eq!(body_bytes(get(&t.app, "/files/pinned.bin").await).await, b"ABCD");

    // Late chunk for the finished upload
    let response = send_form(
        &t.app,
        &[("filename", "pinned.bin"), ("uploadId", &upload_id)],
        b"EF",
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "SESSION_CLOSED");

    // Unknown upload for a name nobody holds
    let response = send_form(
        &t.app,
        &[("filename", "ghost.bin"), ("uploadId", &stranger)],
        b"zz",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_check_file_availability() {
    let t = setup().await;

    let (status, body) = check_file(&t.app, "fresh.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "fresh.txt");
    assert_eq!(body["available"], true);

    // Checking never reserves
    let (status, _) = check_file(&t.app, "fresh.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert!(t.state.uploads.registry().is_empty());

    send_chunk(&t.app, "fresh.txt", b"1", true).await;
    let (status, body) = check_file(&t.app, "fresh.txt").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["available"], false);

    let (status, body) = check_file(&t.app, ".env").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "HIDDEN_FILE");

    let (status, _) = check_file(&t.app, "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_filename_is_confined_to_upload_dir() {
    let t = setup().await;

    let response = send_chunk(&t.app, "../../etc/passwd", b"root", true).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["filename"], "passwd");

    assert!(t.state.config.upload_dir.join("passwd").exists());
    assert!(!t.dir.path().join("etc").exists());

    let response = send_chunk(&t.app, ".staging", b"x", true).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "HIDDEN_FILE");
}

#[tokio::test]
async fn test_resumable_fields() {
    let t = setup().await;

    for (number, data) in [("1", "AB"), ("2", "CD"), ("3", "EF")] {
        let response = send_form(
            &t.app,
            &[
                ("resumableFilename", "movie.mp4"),
                ("resumableChunkNumber", number),
                ("resumableTotalChunks", "3"),
            ],
            data.as_bytes(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(body_bytes(get(&t.app, "/files/movie.mp4").await).await, b"ABCDEF");
}

#[tokio::test]
async fn test_empty_single_chunk_commits_empty_file() {
    let t = setup().await;

    let response = send_chunk(&t.app, "empty.txt", b"", true).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = body_json(response).await;
    assert_eq!(ack["bytes_written"], 0);
    assert_eq!(ack["committed"], true);

    let response = get(&t.app, "/files/empty.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_oversized_chunk_is_rejected_without_a_session() {
    let t = setup().await;
    let chunk = vec![b'x'; t.state.config.max_chunk_size + 1];

    let response = send_chunk(&t.app, "big.bin", &chunk, false).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["code"], "CHUNK_TOO_LARGE");
    assert!(t.state.uploads.registry().is_empty());

    let (status, _) = check_file(&t.app, "big.bin").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_requests() {
    let t = setup().await;

    // No file part
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\nx.bin\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Bad Request: No file provided");

    // No filename
    let response = send_form(&t.app, &[("isLastChunk", "true")], b"AB").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_health() {
    let t = setup().await;
    send_chunk(&t.app, "open.bin", b"A", false).await;

    let response = get(&t.app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "available");
    assert_eq!(body["active_sessions"], 1);
}
