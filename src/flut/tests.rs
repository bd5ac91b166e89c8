use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::*;
use crate::shutdown;

fn cmd_strings(set: &CommandSet) -> Vec<String> {
    set.commands()
        .iter()
        .map(|cmd| String::from_utf8_lossy(cmd).into_owned())
        .collect()
}

/// red | green
/// blue | white
fn sample_2x2() -> RgbaImage {
    let mut img = RgbaImage::new(2, 2);
    img.put_pixel(0, 0, Rgba([0xff, 0, 0, 0xff]));
    img.put_pixel(1, 0, Rgba([0, 0xff, 0, 0xff]));
    img.put_pixel(0, 1, Rgba([0, 0, 0xff, 0xff]));
    img.put_pixel(1, 1, Rgba([0xff, 0xff, 0xff, 0xff]));
    img
}

#[test]
fn left_to_right_walks_columns() {
    let cmds = generate_commands(&sample_2x2(), Point::new(10, 20), RenderOrder::LeftToRight);
    assert_eq!(
        cmd_strings(&cmds),
        vec![
            "PX 10 20 ff0000\n",
            "PX 10 21 0000ff\n",
            "PX 11 20 00ff00\n",
            "PX 11 21 ffffff\n",
        ]
    );
}

#[test]
fn right_to_left_reverses_both_axes() {
    let cmds = generate_commands(&sample_2x2(), Point::new(0, 0), RenderOrder::RightToLeft);
    assert_eq!(
        cmd_strings(&cmds),
        vec![
            "PX 1 1 ffffff\n",
            "PX 1 0 00ff00\n",
            "PX 0 1 0000ff\n",
            "PX 0 0 ff0000\n",
        ]
    );
}

#[test]
fn top_to_bottom_walks_rows() {
    let cmds = generate_commands(&sample_2x2(), Point::new(0, 0), RenderOrder::TopToBottom);
    assert_eq!(
        cmd_strings(&cmds),
        vec![
            "PX 0 0 ff0000\n",
            "PX 1 0 00ff00\n",
            "PX 0 1 0000ff\n",
            "PX 1 1 ffffff\n",
        ]
    );
}

#[test]
fn transparent_pixels_produce_no_commands() {
    let mut img = RgbaImage::new(2, 1);
    img.put_pixel(0, 0, Rgba([1, 2, 3, 0]));
    img.put_pixel(1, 0, Rgba([4, 5, 6, 0x80]));
    let cmds = generate_commands(&img, Point::default(), RenderOrder::LeftToRight);
    // The semi-transparent pixel carries its alpha as 8 hex digits.
    assert_eq!(cmd_strings(&cmds), vec!["PX 1 0 04050680\n"]);
}

#[test]
fn negative_absolute_coordinates_are_skipped() {
    let cmds = generate_commands(&sample_2x2(), Point::new(-1, 0), RenderOrder::LeftToRight);
    assert_eq!(cmd_strings(&cmds), vec!["PX 0 0 00ff00\n", "PX 0 1 ffffff\n"]);
}

#[test]
fn shuffle_keeps_the_command_multiset() {
    let ordered = generate_commands(&sample_2x2(), Point::default(), RenderOrder::LeftToRight);
    let mut shuffled = ordered.clone();
    shuffled.shuffle_with(&mut StdRng::seed_from_u64(7));
    let mut left = cmd_strings(&ordered);
    let mut right = cmd_strings(&shuffled);
    left.sort();
    right.sort();
    assert_eq!(left, right);
}

#[test]
fn chunk_splits_evenly_and_drops_the_remainder() {
    let cmds: CommandSet = (0u8..10).map(|i| vec![i]).collect();
    let chunks = cmds.chunk(3);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0], vec![0, 1, 2]);
    assert_eq!(chunks[1], vec![3, 4, 5]);
    assert_eq!(chunks[2], vec![6, 7, 8]);
}

#[test]
fn chunk_of_one_keeps_everything() {
    let cmds: CommandSet = (0u8..5).map(|i| vec![i]).collect();
    assert_eq!(cmds.chunk(1), vec![vec![0, 1, 2, 3, 4]]);
}

#[test]
fn fetch_commands_cover_the_bounds() {
    let cmds = fetch_commands(Rect::new(2, 3, 2, 2));
    assert_eq!(
        cmd_strings(&cmds),
        vec!["PX 2 3\n", "PX 2 4\n", "PX 3 3\n", "PX 3 4\n"]
    );
}

#[test]
fn parses_pixel_responses_in_both_hex_widths() {
    let (x, y, rgba) = parse_pixel_line("PX 5 7 aabbcc").expect("6-digit response");
    assert_eq!((x, y), (5, 7));
    assert_eq!(rgba, Rgba([0xaa, 0xbb, 0xcc, 0xff]));

    let (x, y, rgba) = parse_pixel_line("PX 5 7 aabbccdd").expect("8-digit response");
    assert_eq!((x, y), (5, 7));
    assert_eq!(rgba, Rgba([0xaa, 0xbb, 0xcc, 0xdd]));
}

#[test]
fn rejects_malformed_pixel_responses() {
    for line in [
        "",
        "PX",
        "PX 5 7",
        "PX 5 7 aabb",
        "PX 5 7 aabbccddee",
        "PX x 7 aabbcc",
        "SIZE 5 7",
        "PX 5 7 zzbbcc",
    ] {
        assert!(parse_pixel_line(line).is_err(), "accepted: {:?}", line);
    }
}

#[test]
fn parses_size_responses_strictly() {
    assert_eq!(parse_size_line("SIZE 1920 1080").expect("size"), (1920, 1080));
    for line in ["", "SIZE", "SIZE 1920", "SIZE 1920 1080 60", "PX 1 2"] {
        assert!(parse_size_line(line).is_err(), "accepted: {:?}", line);
    }
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let mut backoff = BACKOFF_MIN;
    let mut seen = Vec::new();
    for _ in 0..8 {
        seen.push(backoff);
        backoff = next_backoff(backoff);
    }
    assert_eq!(seen[0], Duration::from_millis(100));
    assert_eq!(seen[1], Duration::from_millis(200));
    assert_eq!(seen[5], Duration::from_millis(3200));
    assert_eq!(seen[7], Duration::from_millis(10_000));
    assert_eq!(next_backoff(BACKOFF_MAX), BACKOFF_MAX);
}

#[test]
fn fixed_offset_never_samples() {
    let offset = OffsetSpec::fixed(Point::new(4, 2));
    assert_eq!(offset.sample(&mut StdRng::seed_from_u64(1)), Point::new(4, 2));
}

#[test]
fn random_offset_stays_within_the_bounds() {
    let mut offset = OffsetSpec::random(Point::default(), None);
    offset.set_max(Point::new(20, 10));
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..100 {
        let p = offset.sample(&mut rng);
        assert!((0..20).contains(&p.x));
        assert!((0..10).contains(&p.y));
    }
}

#[test]
fn random_offset_without_known_bounds_uses_the_origin() {
    let offset = OffsetSpec::random(Point::new(3, 3), None);
    assert_eq!(offset.sample(&mut StdRng::seed_from_u64(3)), Point::new(3, 3));
}

#[test]
fn masked_offset_only_picks_opaque_mask_pixels() {
    let mask = Arc::new(RgbaImage::from_pixel(30, 30, Rgba([0, 0, 0, 0xff])));
    let mut offset = OffsetSpec::random(Point::default(), Some(mask));
    offset.set_max(Point::new(30, 30));
    let mut rng = StdRng::seed_from_u64(4);
    for _ in 0..50 {
        let p = offset.sample(&mut rng);
        assert!((0..30).contains(&p.x) && (0..30).contains(&p.y));
    }
}

#[test]
fn fully_transparent_mask_falls_back_to_the_origin() {
    // A mask with no opaque pixel exhausts the sampling budget.
    let mask = Arc::new(RgbaImage::new(30, 30));
    let mut offset = OffsetSpec::random(Point::new(5, 6), Some(mask));
    offset.set_max(Point::new(30, 30));
    assert_eq!(offset.sample(&mut StdRng::seed_from_u64(5)), Point::new(5, 6));
}

#[test]
fn task_is_flutable_only_when_complete() {
    let mut task = FlutTask {
        address: "localhost:1234".to_owned(),
        max_conns: 2,
        img: Some(Arc::new(sample_2x2())),
        ..FlutTask::default()
    };
    assert!(task.is_flutable());

    task.paused = true;
    assert!(!task.is_flutable());
    task.paused = false;

    task.max_conns = 0;
    assert!(!task.is_flutable());
    task.max_conns = 2;

    task.address.clear();
    assert!(!task.is_flutable());
    task.address = "localhost:1234".to_owned();

    task.img = None;
    assert!(!task.is_flutable());
}

#[test]
fn rgb_split_prepends_three_ghost_passes() {
    let mut img = RgbaImage::new(2, 1);
    img.put_pixel(0, 0, Rgba([0xff, 0xff, 0xff, 0xff]));
    img.put_pixel(1, 0, Rgba([0xff, 0, 0, 0xff]));
    let task = FlutTask {
        address: "localhost:1234".to_owned(),
        max_conns: 1,
        img: Some(Arc::new(img.clone())),
        offset: OffsetSpec::fixed(Point::new(20, 20)),
        rgb_split: true,
        ..FlutTask::default()
    };
    let cmds = task_commands(&task, &img);
    // One command per ghost pass (only the white pixel passes the filter),
    // then the two-pixel main pass.
    assert_eq!(
        cmd_strings(&cmds),
        vec![
            "PX 10 10 ff0000\n",
            "PX 30 20 00ff00\n",
            "PX 10 30 0000ff\n",
            "PX 20 20 ffffff\n",
            "PX 21 20 ff0000\n",
        ]
    );
}

#[test]
fn without_rgb_split_only_the_main_pass_remains() {
    let img = sample_2x2();
    let task = FlutTask {
        address: "localhost:1234".to_owned(),
        max_conns: 1,
        img: Some(Arc::new(img.clone())),
        ..FlutTask::default()
    };
    assert_eq!(task_commands(&task, &img).len(), 4);
}

#[test]
fn merged_snapshots_add_up() {
    let mut total = PerfSnapshot {
        conns: 2,
        bytes_per_sec: 10,
        bytes_total: 100,
    };
    total.merge(&PerfSnapshot {
        conns: 1,
        bytes_per_sec: 5,
        bytes_total: 50,
    });
    assert_eq!(
        total,
        PerfSnapshot {
            conns: 3,
            bytes_per_sec: 15,
            bytes_total: 150,
        }
    );
}

/// Minimal in-process pixelflut server: answers SIZE and get-pixel requests
/// from a fixed canvas, drains everything else while counting bytes.
struct MockServer {
    addr: String,
    bytes_seen: Arc<AtomicU64>,
}

async fn spawn_mock_server(canvas: Arc<RgbaImage>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr").to_string();
    let bytes_seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&bytes_seen);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_mock(socket, Arc::clone(&canvas), Arc::clone(&counter)));
        }
    });
    MockServer { addr, bytes_seen }
}

async fn serve_mock(socket: TcpStream, canvas: Arc<RgbaImage>, bytes_seen: Arc<AtomicU64>) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        bytes_seen.fetch_add(line.len() as u64 + 1, Ordering::Relaxed);
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        match fields.as_slice() {
            ["SIZE"] => {
                let reply = format!("SIZE {} {}\n", canvas.width(), canvas.height());
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
            ["PX", x, y] => {
                let (Ok(x), Ok(y)) = (x.parse::<u32>(), y.parse::<u32>()) else {
                    return;
                };
                if x < canvas.width() && y < canvas.height() {
                    let px = canvas.get_pixel(x, y);
                    let reply =
                        format!("PX {} {} {:02x}{:02x}{:02x}\n", x, y, px[0], px[1], px[2]);
                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            // Set-pixel and OFFSET lines are just drained.
            _ => {}
        }
    }
}

fn opaque_test_canvas(w: u32, h: u32) -> RgbaImage {
    let mut img = RgbaImage::new(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgba([x as u8, y as u8, (x + y) as u8, 0xff]);
    }
    img
}

#[tokio::test]
async fn canvas_size_queries_the_server() {
    let server = spawn_mock_server(Arc::new(RgbaImage::new(8, 4))).await;
    let size = canvas_size(&server.addr).await.expect("size query");
    assert_eq!(size, (8, 4));
}

#[tokio::test]
async fn canvas_size_fails_on_a_dead_address() {
    // Bind and immediately drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr").port()
    };
    let result = canvas_size(&format!("127.0.0.1:{}", port)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn fetch_image_reassembles_the_canvas() {
    let canvas = opaque_test_canvas(8, 4);
    let server = spawn_mock_server(Arc::new(canvas.clone())).await;
    let (_cancel_tx, cancel_rx) = shutdown::channel();

    // 4 connections divide the 32 requests evenly, so the fetched image must
    // match pixel for pixel.
    let fetched = tokio::time::timeout(
        Duration::from_secs(5),
        fetch_image(None, &server.addr, 4, cancel_rx),
    )
    .await
    .expect("fetch should complete")
    .expect("fetch should succeed");
    assert_eq!(fetched, canvas);
}

#[tokio::test]
async fn fetch_image_honors_explicit_bounds() {
    let canvas = opaque_test_canvas(8, 4);
    let server = spawn_mock_server(Arc::new(canvas.clone())).await;
    let (_cancel_tx, cancel_rx) = shutdown::channel();

    let bounds = Rect::new(2, 1, 3, 2);
    let fetched = tokio::time::timeout(
        Duration::from_secs(5),
        fetch_image(Some(bounds), &server.addr, 1, cancel_rx),
    )
    .await
    .expect("fetch should complete")
    .expect("fetch should succeed");
    assert_eq!(fetched.dimensions(), (3, 2));
    for (x, y, px) in fetched.enumerate_pixels() {
        assert_eq!(px, canvas.get_pixel(x + 2, y + 1));
    }
}

#[tokio::test]
async fn bomber_stops_on_cancel() {
    let server = spawn_mock_server(Arc::new(RgbaImage::new(4, 4))).await;
    let (cancel_tx, cancel_rx) = shutdown::channel();
    let perf = PerfAggregator::spawn(false);
    let buffer = Arc::new(b"PX 0 0 ff0000\n".to_vec());

    let bomber = tokio::spawn(bomb_address(
        buffer,
        server.addr.clone(),
        None,
        perf.handle(),
        cancel_rx,
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = cancel_tx.send(true);
    tokio::time::timeout(Duration::from_secs(2), bomber)
        .await
        .expect("bomber should stop on cancel")
        .expect("bomber task should join");
    assert!(server.bytes_seen.load(Ordering::Relaxed) > 0);
}

#[tokio::test]
async fn start_flut_runs_and_stops() {
    let server = spawn_mock_server(Arc::new(RgbaImage::new(16, 16))).await;
    let perf = PerfAggregator::spawn(false);
    let task = FlutTask {
        address: server.addr.clone(),
        max_conns: 2,
        img: Some(Arc::new(sample_2x2())),
        ..FlutTask::default()
    };

    let runner = start_flut(&task, perf.handle()).expect("flutable task should start");
    tokio::time::sleep(Duration::from_millis(300)).await;
    tokio::time::timeout(Duration::from_secs(2), runner.stop())
        .await
        .expect("stop should not hang");
    assert!(server.bytes_seen.load(Ordering::Relaxed) > 0);
}

#[tokio::test]
async fn random_offset_floods_send_offset_commands() {
    let server = spawn_mock_server(Arc::new(RgbaImage::new(64, 64))).await;
    let perf = PerfAggregator::spawn(false);
    let task = FlutTask {
        address: server.addr.clone(),
        max_conns: 2,
        img: Some(Arc::new(sample_2x2())),
        offset: OffsetSpec::random(Point::default(), None),
        ..FlutTask::default()
    };

    let runner = start_flut(&task, perf.handle()).expect("flutable task should start");
    tokio::time::sleep(Duration::from_millis(300)).await;
    tokio::time::timeout(Duration::from_secs(2), runner.stop())
        .await
        .expect("stop should not hang");
    assert!(server.bytes_seen.load(Ordering::Relaxed) > 0);
}

#[tokio::test]
async fn failed_startup_finishes_the_driver() {
    // Bind and immediately drop to get a port nothing listens on. A random
    // offset makes the driver query the canvas size first, which fails.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr").port()
    };
    let perf = PerfAggregator::spawn(false);
    let task = FlutTask {
        address: format!("127.0.0.1:{}", port),
        max_conns: 1,
        img: Some(Arc::new(sample_2x2())),
        offset: OffsetSpec::random(Point::default(), None),
        ..FlutTask::default()
    };

    let runner = start_flut(&task, perf.handle()).expect("flutable task should start");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !runner.is_finished() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "driver should exit after the failed size query"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Stopping an already-finished runner stays a no-op.
    tokio::time::timeout(Duration::from_secs(2), runner.stop())
        .await
        .expect("stop should not hang");
}

#[tokio::test]
async fn paused_tasks_do_not_start() {
    let perf = PerfAggregator::spawn(false);
    let task = FlutTask {
        address: "localhost:1234".to_owned(),
        max_conns: 1,
        img: Some(Arc::new(sample_2x2())),
        paused: true,
        ..FlutTask::default()
    };
    assert!(start_flut(&task, perf.handle()).is_none());
}

#[tokio::test]
async fn perf_aggregator_counts_connections_and_bytes() {
    let perf = PerfAggregator::spawn(true);
    let handle = perf.handle();
    handle.connected().await;
    handle.record_bytes(1500).await;
    handle.connected().await;
    handle.disconnected().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let snapshot = perf.snapshot();
        if snapshot.conns == 1 && snapshot.bytes_total == 1500 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "aggregator never published, last snapshot: {:?}",
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn disabled_reporting_skips_byte_deltas() {
    let perf = PerfAggregator::spawn(false);
    assert!(!perf.is_enabled());
    let handle = perf.handle();
    handle.record_bytes(999).await;
    handle.connected().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let snapshot = perf.snapshot();
        if snapshot.conns == 1 {
            assert_eq!(snapshot.bytes_total, 0);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "aggregator never published, last snapshot: {:?}",
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
