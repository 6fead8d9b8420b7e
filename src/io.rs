//! 输入源与输出端：Perceive 的 next_input 与 Deliver 的 deliver
//!
//! - StdinInput / StdoutSink：命令行逐行读入、打印回复
//! - ChannelInput / ChannelSink：基于 mpsc 通道，供嵌入式调用与测试使用

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

/// 输入源：可能长时间阻塞；返回 None 表示输入已耗尽
#[async_trait]
pub trait InputSource: Send {
    async fn next_input(&mut self) -> Option<String>;
}

/// 回复输出端
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(&self, response: &str);
}

/// 标准输入：每行一条输入，跳过空行
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
    prompt: Option<String>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt: None,
        }
    }

    /// 每次读取前打印的提示符（如 "> "）
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputSource for StdinInput {
    async fn next_input(&mut self) -> Option<String> {
        loop {
            if let Some(prompt) = &self.prompt {
                let mut out = tokio::io::stdout();
                let _ = out.write_all(prompt.as_bytes()).await;
                let _ = out.flush().await;
            }
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(line),
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed, treating input as closed");
                    return None;
                }
            }
        }
    }
}

/// 标准输出：`<speaker>: <response>`
pub struct StdoutSink {
    speaker: String,
}

impl StdoutSink {
    pub fn new(speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
        }
    }
}

#[async_trait]
impl ResponseSink for StdoutSink {
    async fn deliver(&self, response: &str) {
        let line = format!("{}: {}\n", self.speaker, response);
        let mut out = tokio::io::stdout();
        if let Err(e) = out.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "stdout write failed");
        }
        let _ = out.flush().await;
    }
}

/// 通道输入：发送端全部关闭后返回 None
pub struct ChannelInput {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelInput {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// 创建输入通道，返回 (发送端, 输入源)
    pub fn channel() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl InputSource for ChannelInput {
    async fn next_input(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// 通道输出：每条回复发送到接收端（接收端关闭时丢弃并告警）
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// 创建输出通道，返回 (输出端, 接收端)
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn deliver(&self, response: &str) {
        if self.tx.send(response.to_string()).is_err() {
            tracing::warn!("response receiver dropped, response discarded");
        }
    }
}
