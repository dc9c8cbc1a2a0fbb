use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::{McpReply, McpServer};

async fn write_line<W, T>(writer: &mut W, message: &T) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve line-delimited JSON-RPC until `reader` reaches EOF.
///
/// Streamed tools write one notification line per fragment before their
/// final response line. Only protocol messages go to `writer`.
pub async fn serve_lines<R, W>(server: &McpServer, reader: R, mut writer: W) -> crate::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match server.handle_message(line).await {
            McpReply::Response(response) => write_line(&mut writer, &response).await?,
            McpReply::Streaming(reply) => {
                let mut events = reply.into_events();
                while let Some(event) = events.next().await {
                    write_line(&mut writer, &event).await?;
                }
            }
            McpReply::NoContent => debug!("No reply for notification"),
        }
    }
    info!("stdin closed, stopping stdio transport");
    Ok(())
}

/// Serve on the process's stdin/stdout.
pub async fn serve_stdio(server: &McpServer) -> crate::Result<()> {
    info!("Serving MCP over stdio");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve_lines(server, stdin, tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tests::test_server;
    use serde_json::Value;

    async fn run(server: &McpServer, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve_lines(server, input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn answers_each_request_line() {
        let server = test_server(&[]);
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
            "garbage\n",
        );

        let messages = run(&server, input).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["id"], 1);
        assert_eq!(messages[1]["id"], 2);
        assert_eq!(messages[2]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn streams_fragments_as_notification_lines() {
        let server = test_server(&["Check ", "disk ", "usage."]);
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"redshift_cot_thinking","arguments":{"issues":"disk full"}}}"#,
            "\n"
        );

        let messages = run(&server, input).await;
        assert_eq!(messages.len(), 4);
        for note in &messages[..3] {
            assert_eq!(note["method"], "notifications/message");
            assert!(note.get("id").is_none());
        }
        assert_eq!(messages[3]["id"], 9);
        assert_eq!(messages[3]["result"]["content"][0]["text"], "Check disk usage.");
    }
}
