//! JSON-lines request loop: one [`Request`] per input line, one response per output line.

use crate::config::ResamplingConfig;
use crate::dataset::DatasetHandle;
use crate::error::Result;
use crate::query::{QueryService, Request};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct Success<'a, T: Serialize> {
    ok: bool,
    result: &'a T,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

#[derive(Serialize)]
struct Failure<'a> {
    ok: bool,
    error: ErrorBody<'a>,
}

fn encode_answer(handle: &DatasetHandle, config: &ResamplingConfig, line: &str) -> Result<Vec<u8>> {
    let request: Request = serde_json::from_str(line)?;
    let service = QueryService::new(handle.current(), config.clone());
    let answer = service.answer(&request)?;
    // frames are evaluated while they are written
    Ok(serde_json::to_vec(&Success {
        ok: true,
        result: &answer,
    })?)
}

/// Encode the response to one request line against the dataset current at call time
pub fn respond(handle: &DatasetHandle, config: &ResamplingConfig, line: &str) -> Result<Vec<u8>> {
    match encode_answer(handle, config, line) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            warn!("Request failed ({}): {}", e.kind(), e);
            Ok(serde_json::to_vec(&Failure {
                ok: false,
                error: ErrorBody {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            })?)
        }
    }
}

/// Runs until end of input or shutdown; returns the number of requests answered
pub async fn serve_lines<R, W>(
    handle: DatasetHandle,
    config: ResamplingConfig,
    reader: R,
    mut writer: W,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received, stopping request loop");
                break;
            }
        };

        let Some(line) = line else {
            debug!("End of input after {} requests", handled);
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        // Animations can be large; keep evaluation off the async workers
        let (request_handle, request_config) = (handle.clone(), config.clone());
        let mut bytes = tokio::task::spawn_blocking(move || {
            respond(&request_handle, &request_config, &line)
        })
        .await??;

        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        handled += 1;
    }

    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use serde_json::Value;

    const CSV: &str = "\
timestamp,station_id,station_name,lat,lon,temp
2025-01-15 10:00:00,1,Alpha,-33.0,-70.0,20.0
2025-01-15 11:00:00,1,Alpha,-33.0,-70.0,26.0
";

    fn handle() -> DatasetHandle {
        DatasetHandle::new(Dataset::from_reader(CSV.as_bytes(), "inline").unwrap())
    }

    fn reply(line: &str) -> Value {
        let bytes = respond(&handle(), &ResamplingConfig::default(), line).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn responses(output: &[u8]) -> Vec<Value> {
        output
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[test]
    fn test_respond_success() {
        let response = reply(r#"{"query":"snapshot","timestamp":"2025-01-15T10:30:00Z"}"#);
        assert_eq!(response["ok"], true);
        assert_eq!(
            response["result"]["stations"][0]["values"]["temperature"],
            23.0
        );
    }

    #[test]
    fn test_respond_malformed_request() {
        let response = reply("{not json");
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["kind"], "invalid_request");
    }

    #[test]
    fn test_respond_unknown_station() {
        let response = reply(r#"{"query":"time_series","station_id":99}"#);
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["kind"], "not_found");
    }

    #[test]
    fn test_respond_animation_frames_in_envelope() {
        let response = reply(
            r#"{"query":"animation","start":"2025-01-15 10:00","end":"2025-01-15 11:00","interval":"15min"}"#,
        );
        assert_eq!(response["ok"], true);
        assert_eq!(response["result"]["frame_count"], 5);

        let frames = response["result"]["frames"].as_array().unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[2]["stations"][0]["values"]["temperature"], 23.0);
    }

    #[test]
    fn test_respond_range_too_large() {
        let config = ResamplingConfig {
            max_frames: 2,
            ..ResamplingConfig::default()
        };
        let bytes = respond(
            &handle(),
            &config,
            r#"{"query":"animation","interval":"15min"}"#,
        )
        .unwrap();
        let response: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["kind"], "range_too_large");
    }

    #[tokio::test]
    async fn test_serve_lines_until_eof() {
        let input = "\
{\"query\":\"stations\"}

{\"query\":\"summary\"}
{\"query\":\"animation\",\"start\":\"2025-01-15 10:00\",\"end\":\"2025-01-15 10:00\",\"interval\":60}
";
        let (_tx, rx) = watch::channel(false);
        let mut output = Vec::new();

        let handled = serve_lines(
            handle(),
            ResamplingConfig::default(),
            input.as_bytes(),
            &mut output,
            rx,
        )
        .await
        .unwrap();

        assert_eq!(handled, 3);
        let lines = responses(&output);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["result"]["total_stations"], 1);
        assert_eq!(lines[1]["result"]["stations_count"], 1);
        assert_eq!(lines[2]["result"]["frame_count"], 1);
    }
}
