//! Deterministic in-process providers for pipeline tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::llm::LanguageModel;

pub const FAKE_DIMENSION: usize = 256;

/// Bag-of-words hashing embedding: texts sharing words score higher
pub struct FakeEmbedding {
    pub calls: Mutex<usize>,
}

impl FakeEmbedding {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(0),
        }
    }

    pub fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; FAKE_DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            // FNV-1a
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % FAKE_DIMENSION as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        *self.calls.lock().unwrap() += 1;
        Ok(Self::embed(text))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(FAKE_DIMENSION)
    }

    fn name(&self) -> &str {
        "fake-embedding"
    }
}

/// Records prompts; fails on prompts containing `fail_on`
pub struct FakeLlm {
    pub answer: String,
    pub fail_on: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            fail_on: None,
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(marker) = &self.fail_on {
            if prompt.contains(marker.as_str()) {
                anyhow::bail!("fake completion failure");
            }
        }
        Ok(self.answer.clone())
    }

    fn name(&self) -> &str {
        "fake-llm"
    }
}

/// Read one HTTP request (head and `Content-Length` body)
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut expected = None;

    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }

        if expected.is_none() {
            if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                expected = Some(head_end + 4 + body_len);
            }
        }

        if matches!(expected, Some(total) if buf.len() >= total) {
            break;
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

async fn write_response(
    socket: &mut tokio::net::TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
    declared_len: usize,
) {
    use tokio::io::AsyncWriteExt;

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        if status == 200 { "OK" } else { "Error" },
        content_type,
        declared_len,
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Serve fixed pages over HTTP on a local port; unknown paths get 404.
///
/// Returns the base URL (`http://127.0.0.1:<port>/`).
pub async fn serve_pages(pages: Vec<(&'static str, u16, &'static str)>) -> String {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let pages = pages.clone();

            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body) = pages
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, "not found"));

                write_response(
                    &mut socket,
                    status,
                    "text/html; charset=utf-8",
                    body,
                    body.len(),
                )
                .await;
            });
        }
    });

    format!("http://{}/", addr)
}

/// One scripted reply of [`serve_sequence`]
#[derive(Debug, Clone, Copy)]
pub struct Reply {
    pub status: u16,
    pub body: &'static str,
    /// Close the connection before the declared body length is sent
    pub cut_short: bool,
}

impl Reply {
    pub fn new(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            cut_short: false,
        }
    }

    pub fn cut_short(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            cut_short: true,
        }
    }
}

/// Answer the n-th request with `replies[n]` (the last one repeats), any path.
///
/// Returns the base URL and the number of requests served so far.
pub async fn serve_sequence(replies: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let _ = read_request(&mut socket).await;

            let n = counter.fetch_add(1, Ordering::SeqCst);
            let Some(reply) = replies.get(n).or_else(|| replies.last()).copied() else {
                break;
            };

            let declared_len = if reply.cut_short {
                reply.body.len() + 64
            } else {
                reply.body.len()
            };
            write_response(
                &mut socket,
                reply.status,
                "application/json",
                reply.body,
                declared_len,
            )
            .await;
        }
    });

    (format!("http://{}/", addr), hits)
}

/// Minimal PDF with one page per entry, each drawing its text in Courier.
/// An empty entry makes a page with no text.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let font_id = 3;
    let first_page_id = 4;

    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", first_page_id + 2 * i))
        .collect();

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_string(),
    ];

    for (i, text) in pages.iter().enumerate() {
        let content_id = first_page_id + 2 * i + 1;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>",
            font_id, content_id
        ));

        let stream = if text.is_empty() {
            String::new()
        } else {
            format!("BT /F1 24 Tf 72 720 Td ({}) Tj ET", text)
        };
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            stream.len(),
            stream
        ));
    }

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).as_bytes());
    }

    let xref_offset = pdf.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        xref.push_str(&format!("{:010} 00000 n \n", offset));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));
    pdf.extend_from_slice(xref.as_bytes());

    pdf
}
