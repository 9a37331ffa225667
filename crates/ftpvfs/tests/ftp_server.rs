//! End-to-end tests against the in-process fake FTP server.

use std::io::SeekFrom;
use std::time::{Duration, UNIX_EPOCH};

use ftpvfs::{Authority, FileSystem, FtpOptions};
use ftpvfs_proto::testing::{FakeServer, FakeServerOptions};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn authority(server: &FakeServer) -> Authority {
    Authority::new("127.0.0.1").with_port(server.port())
}

async fn read_string(file: &mut ftpvfs::File) -> String {
    let mut out = Vec::new();
    file.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn write_then_seek_and_read() {
    init_tracing();
    let server = FakeServer::start().await.unwrap();
    let fs = FileSystem::default();
    let mut file = fs.new_file(&authority(&server), "/new/dir/hello.txt").unwrap();

    file.write(b"hello ").await.unwrap();
    file.write(b"world!").await.unwrap();
    file.close().await.unwrap();
    assert!(server.is_dir("/new/dir"));
    assert_eq!(server.get("/new/dir/hello.txt").unwrap(), b"hello world!");

    assert_eq!(file.seek(SeekFrom::Start(6)).await.unwrap(), 6);
    assert_eq!(read_string(&mut file).await, "world!");

    assert_eq!(file.seek(SeekFrom::End(8)).await.unwrap(), 4);
    assert_eq!(read_string(&mut file).await, "o world!");

    assert_eq!(file.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(read_string(&mut file).await, "hello world!");
    file.close().await.unwrap();

    assert!(server.commands().iter().any(|c| c == "REST 6"));
    fs.shutdown().await.unwrap();
}

#[tokio::test]
async fn metadata_with_and_without_mlst() {
    init_tracing();
    for mlst in [true, false] {
        let server = FakeServer::start_with(FakeServerOptions {
            mlst,
            mfmt: mlst,
            ..FakeServerOptions::default()
        })
        .await
        .unwrap();
        server.put("/data/a.bin", &[7; 42]);
        let fs = FileSystem::default();

        let mut file = fs.new_file(&authority(&server), "/data/a.bin").unwrap();
        assert!(file.exists().await.unwrap());
        assert_eq!(file.size().await.unwrap(), 42);

        let mut missing = fs.new_file(&authority(&server), "/data/none.bin").unwrap();
        assert!(!missing.exists().await.unwrap());
        assert_eq!(missing.seek(SeekFrom::End(3)).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn touch_updates_modification_time() {
    init_tracing();
    let server = FakeServer::start().await.unwrap();
    let old = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
    server.put("/t.txt", b"x");
    server.set_modified("/t.txt", old);

    let fs = FileSystem::default();
    let mut file = fs.new_file(&authority(&server), "/t.txt").unwrap();
    file.touch().await.unwrap();
    assert!(server.modified("/t.txt").unwrap() > old);
    assert!(server.commands().iter().any(|c| c.starts_with("MFMT ")));

    let mut created = fs.new_file(&authority(&server), "/fresh/empty.txt").unwrap();
    created.touch().await.unwrap();
    assert_eq!(server.get("/fresh/empty.txt").unwrap(), b"");
}

#[tokio::test]
async fn copy_and_move_on_one_server() {
    init_tracing();
    let server = FakeServer::start().await.unwrap();
    server.put("/src/report.csv", b"a,b,c\n1,2,3\n");
    let fs = FileSystem::default();
    let authority = authority(&server);

    let mut source = fs.new_file(&authority, "/src/report.csv").unwrap();
    let backup = fs.new_location(&authority, "/backup/").unwrap();
    source.copy_to_location(&backup).await.unwrap();
    assert_eq!(server.get("/backup/report.csv").unwrap(), b"a,b,c\n1,2,3\n");

    let mut target = fs.new_file(&authority, "/archive/2024/report.csv").unwrap();
    source.move_to_file(&mut target).await.unwrap();
    assert!(server.get("/src/report.csv").is_none());
    assert_eq!(server.get("/archive/2024/report.csv").unwrap(), b"a,b,c\n1,2,3\n");
    assert!(server.commands().iter().any(|c| c == "RNTO /archive/2024/report.csv"));

    let src = fs.new_location(&authority, "/src/").unwrap();
    assert!(src.list().await.unwrap().is_empty());
    assert_eq!(backup.list().await.unwrap(), vec!["report.csv"]);
}

#[tokio::test]
async fn move_between_servers_streams_and_deletes() {
    init_tracing();
    let origin = FakeServer::start().await.unwrap();
    let destination = FakeServer::start().await.unwrap();
    origin.put("/out/blob", &[1, 2, 3, 4, 5]);

    let fs = FileSystem::new(FtpOptions::new().with_password("secret"));
    let from = authority(&origin).with_user("alice");
    let to = authority(&destination).with_user("bob");

    let mut source = fs.new_file(&from, "/out/blob").unwrap();
    let mut target = fs.new_file(&to, "/in/blob").unwrap();
    source.move_to_file(&mut target).await.unwrap();

    assert_eq!(destination.get("/in/blob").unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(origin.get("/out/blob").is_none());
    assert!(!origin.commands().iter().any(|c| c.starts_with("RNFR")));
    assert!(destination.commands().contains(&"USER bob".to_string()));
}

#[tokio::test]
async fn failed_upload_surfaces_from_close() {
    init_tracing();
    let server = FakeServer::start_with(FakeServerOptions {
        fail_stor: true,
        ..FakeServerOptions::default()
    })
    .await
    .unwrap();
    let fs = FileSystem::default();
    let mut file = fs.new_file(&authority(&server), "/quota.bin").unwrap();

    file.write(b"too much").await.unwrap();
    let err = file.close().await.unwrap_err();
    assert!(err.to_string().contains("552"), "{err}");
    assert_eq!(file.offset(), 0);

    // The control connection is still usable afterwards.
    assert!(!file.exists().await.unwrap());
}
