//! Integration test for the S3 object store using S3Mock.
//! Checkpoints merge on the real API and a day compacts into a readable zip.

use std::io::Cursor;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use bytes::Bytes;
use testcontainers::core::WaitFor;
use testcontainers::{clients, GenericImage};
use tokio::time::{sleep, Duration};
use zip::ZipArchive;

use mq_archiver::emit::archive::ArchiveCompactor;
use mq_archiver::emit::checkpoint::{Checkpoint, CheckpointWriter};
use mq_archiver::emit::uploader::{MultipartSettings, S3ObjectStore};
use mq_archiver::emit::ObjectStore;

async fn create_bucket(client: &Client, bucket: &str) {
    let mut tries = 0;
    loop {
        match client.create_bucket().bucket(bucket).send().await {
            Ok(_) => break,
            Err(_)
                if {
                    tries += 1;
                    tries <= 10
                } =>
            {
                sleep(Duration::from_millis(150)).await;
            }
            Err(e) => panic!("create_bucket failed after retries: {e:?}"),
        }
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test it_s3 -- --ignored
async fn s3_mock_checkpoint_and_archive() {
    // Start S3Mock on port 9090.
    let docker = clients::Cli::default();
    let img = GenericImage::new("adobe/s3mock", "latest")
        .with_exposed_port(9090)
        .with_wait_for(WaitFor::message_on_stdout("Started S3MockApplication"));
    let node = docker.run(img);
    let port = node.get_host_port_ipv4(9090);
    let endpoint = format!("http://127.0.0.1:{port}");

    let shared = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new("ap-southeast-2"))
        .endpoint_url(endpoint.clone())
        .load()
        .await;
    let conf = S3ConfigBuilder::from(&shared)
        .credentials_provider(Credentials::new("test", "test", None, None, "static"))
        .force_path_style(true)
        .build();
    let client = Client::from_conf(conf);

    create_bucket(&client, "incident-text").await;
    create_bucket(&client, "incident-zip").await;

    // Multipart for anything over 5 MiB so the archive path exercises it.
    let store = S3ObjectStore::new(client.clone()).with_multipart(MultipartSettings {
        threshold: 5 * 1024 * 1024,
        part_size: 5 * 1024 * 1024,
        parallel_parts: 2,
    });

    // Missing object maps to NotFound.
    let err = store.get("incident-text", "nope.txt").await.unwrap_err();
    assert!(err.is_not_found());

    // Two runs in the same second merge into one object.
    let key = "2024-05-01/2024-05-01 10:00:00.txt";
    let writer = CheckpointWriter::new(&store, "incident-text");
    for chunk in ["m1\nm2\n", "m3\n"] {
        writer
            .write(&Checkpoint {
                key: key.into(),
                content: Bytes::from_static(chunk.as_bytes()),
            })
            .await
            .expect("checkpoint");
    }
    assert_eq!(store.get("incident-text", key).await.unwrap(), "m1\nm2\nm3\n");

    // A large checkpoint goes through multipart upload.
    let big: String = "x".repeat(1023) + "\n";
    let big = Bytes::from(big.repeat(12 * 1024));
    store
        .put("incident-text", "2024-05-01/2024-05-01 11:00:00.txt", big.clone())
        .await
        .expect("multipart put");

    let manifest = ArchiveCompactor::new("incident-text", "incident-zip")
        .compact(&store, "2024-05-01/", "2024-05-01.zip")
        .await
        .unwrap()
        .expect("day has checkpoints");
    assert_eq!(manifest.keys.len(), 2);

    let zipped = store.get("incident-zip", "2024-05-01.zip").await.unwrap();
    let archive = ZipArchive::new(Cursor::new(zipped.to_vec())).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"2024-05-01 10:00:00.txt"));
    assert!(names.contains(&"2024-05-01 11:00:00.txt"));
}
