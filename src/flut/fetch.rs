use std::sync::Arc;

use image::{Rgba, RgbaImage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{AppError, AppResult, NetError, ProtocolError};
use crate::shutdown::{self, ShutdownReceiver};

use super::commands::{Rect, fetch_commands};

/// Queries the server-side canvas dimensions via `SIZE`.
///
/// # Errors
///
/// Returns an error if the connection fails or the response is malformed.
pub async fn canvas_size(address: &str) -> AppResult<(u32, u32)> {
    let stream = TcpStream::connect(address).await.map_err(|err| {
        AppError::net(NetError::Connect {
            addr: address.to_owned(),
            source: err,
        })
    })?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(b"SIZE\n").await.map_err(|err| {
        AppError::net(NetError::Io {
            context: "size query",
            source: err,
        })
    })?;
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(|err| {
        AppError::net(NetError::Io {
            context: "size response",
            source: err,
        })
    })?;
    if n == 0 {
        return Err(AppError::net(NetError::Closed));
    }
    Ok(parse_size_line(line.trim_end())?)
}

/// Parses a `SIZE <width> <height>` response line (without the newline).
///
/// # Errors
///
/// Returns a protocol error for anything that is not exactly that shape.
pub fn parse_size_line(line: &str) -> Result<(u32, u32), ProtocolError> {
    let malformed = || ProtocolError::MalformedSizeResponse {
        line: line.to_owned(),
    };
    let mut parts = line.split_ascii_whitespace();
    if parts.next() != Some("SIZE") {
        return Err(malformed());
    }
    let w = parts
        .next()
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let h = parts
        .next()
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok((w, h))
}

/// Parses a `PX <x> <y> <hex>` get-pixel response (without the newline).
/// The hex field is 6 digits (RGB, implicit full alpha) or 8 digits (RGBA);
/// the server variant is inferred from the field length, there is no
/// protocol flag.
///
/// # Errors
///
/// Returns a protocol error for any other line shape; a truncated response
/// almost always means the connection desynced, so callers must not retry.
pub fn parse_pixel_line(line: &str) -> Result<(u32, u32, Rgba<u8>), ProtocolError> {
    let malformed = || ProtocolError::MalformedPixelResponse {
        line: line.to_owned(),
    };
    let rest = line.strip_prefix("PX ").ok_or_else(malformed)?;
    let (coords, hex) = rest.rsplit_once(' ').ok_or_else(malformed)?;
    let (x_str, y_str) = coords.split_once(' ').ok_or_else(malformed)?;
    let x = x_str.parse::<u32>().ok().ok_or_else(malformed)?;
    let y = y_str.parse::<u32>().ok().ok_or_else(malformed)?;

    let rgba = match hex.len() {
        6 => {
            let (r, g, b) = (hex_byte(hex, 0), hex_byte(hex, 2), hex_byte(hex, 4));
            match (r, g, b) {
                (Some(r), Some(g), Some(b)) => Rgba([r, g, b, 0xff]),
                _ => return Err(malformed()),
            }
        }
        8 => {
            let parsed = (
                hex_byte(hex, 0),
                hex_byte(hex, 2),
                hex_byte(hex, 4),
                hex_byte(hex, 6),
            );
            match parsed {
                (Some(r), Some(g), Some(b), Some(a)) => Rgba([r, g, b, a]),
                _ => return Err(malformed()),
            }
        }
        _ => return Err(malformed()),
    };
    Ok((x, y, rgba))
}

fn hex_byte(s: &str, at: usize) -> Option<u8> {
    s.get(at..at + 2)
        .and_then(|pair| u8::from_str_radix(pair, 16).ok())
}

enum FetchEvent {
    Pixel { x: u32, y: u32, rgba: Rgba<u8> },
    Complete,
    Failed(AppError),
}

/// Fetches the pixel state within `bounds` (the full canvas when `None`)
/// using `conns` connections, each owning a disjoint chunk of read requests.
/// Parsed pixels flow over a channel into a single assembler that owns the
/// target image, which keeps the image single-writer without locks.
///
/// Returns once every connection has received one full pass of its chunk, or
/// when `cancel` fires (yielding whatever arrived so far).
///
/// # Errors
///
/// Returns an error if the bounds cannot be determined or if a connection
/// hits a protocol desync before anything completes.
pub async fn fetch_image(
    bounds: Option<Rect>,
    address: &str,
    conns: usize,
    mut cancel: ShutdownReceiver,
) -> AppResult<RgbaImage> {
    let bounds = match bounds {
        Some(bounds) => bounds,
        None => {
            let (w, h) = canvas_size(address).await?;
            Rect::new(0, 0, w, h)
        }
    };

    let conns = conns.max(1);
    let requests = fetch_commands(bounds);
    let quota = requests.len() / conns;
    let chunks = requests.chunk(conns);

    let (stop_tx, stop_rx) = shutdown::channel();
    let stop_tx = Arc::new(stop_tx);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<FetchEvent>();

    // Forward external cancellation into the fetch-local stop signal.
    let forward_stop = Arc::clone(&stop_tx);
    tokio::spawn(async move {
        shutdown::wait(&mut cancel).await;
        let _ = forward_stop.send(true);
    });

    let mut active = 0usize;
    for chunk in chunks {
        if chunk.is_empty() {
            continue;
        }
        active += 1;
        tokio::spawn(fetch_conn(
            address.to_owned(),
            chunk,
            quota,
            event_tx.clone(),
            stop_rx.clone(),
        ));
    }
    drop(event_tx);

    let mut img = RgbaImage::new(bounds.w, bounds.h);
    let mut completed = 0usize;
    let mut first_err: Option<AppError> = None;
    let mut any_pixels = false;

    while let Some(event) = event_rx.recv().await {
        match event {
            FetchEvent::Pixel { x, y, rgba } => {
                let (rx, ry) = (x.wrapping_sub(bounds.x), y.wrapping_sub(bounds.y));
                if rx < bounds.w && ry < bounds.h {
                    img.put_pixel(rx, ry, rgba);
                    any_pixels = true;
                }
            }
            FetchEvent::Complete => {
                completed += 1;
                if completed == active {
                    let _ = stop_tx.send(true);
                }
            }
            FetchEvent::Failed(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
                let _ = stop_tx.send(true);
            }
        }
    }

    match first_err {
        Some(err) if !any_pixels => Err(err),
        _ => Ok(img),
    }
}

/// One fetch connection: a writer loop re-issuing the request chunk (same
/// shape as the bomber, minus backoff and offset) and a reader loop parsing
/// streamed responses. A malformed line is fatal for the connection.
async fn fetch_conn(
    address: String,
    buffer: Vec<u8>,
    quota: usize,
    event_tx: mpsc::UnboundedSender<FetchEvent>,
    mut stop: ShutdownReceiver,
) {
    let stream = match TcpStream::connect(&address).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = event_tx.send(FetchEvent::Failed(AppError::net(NetError::Connect {
                addr: address,
                source: err,
            })));
            return;
        }
    };
    let (read_half, mut write_half) = stream.into_split();

    let mut writer_stop = stop.clone();
    let writer = tokio::spawn(async move {
        loop {
            if *writer_stop.borrow() {
                break;
            }
            tokio::select! {
                result = write_half.write_all(&buffer) => {
                    if result.is_err() {
                        break;
                    }
                }
                _ = writer_stop.changed() => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let mut received = 0usize;
    loop {
        if *stop.borrow() {
            break;
        }
        line.clear();
        let read = tokio::select! {
            result = reader.read_line(&mut line) => result,
            _ = stop.changed() => break,
        };
        match read {
            Ok(0) => {
                debug!("Fetch connection to {} closed by server", address);
                break;
            }
            Ok(_) => match parse_pixel_line(line.trim_end()) {
                Ok((x, y, rgba)) => {
                    let _ = event_tx.send(FetchEvent::Pixel { x, y, rgba });
                    received += 1;
                    if received >= quota {
                        let _ = event_tx.send(FetchEvent::Complete);
                        break;
                    }
                }
                Err(err) => {
                    error!("Protocol desync on fetch connection: {}", err);
                    let _ = event_tx.send(FetchEvent::Failed(err.into()));
                    break;
                }
            },
            Err(err) => {
                let _ = event_tx.send(FetchEvent::Failed(AppError::net(NetError::Io {
                    context: "pixel response",
                    source: err,
                })));
                break;
            }
        }
    }
    writer.abort();
}
