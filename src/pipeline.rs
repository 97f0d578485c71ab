//! The question-answering pipeline: retrieve → format context → generate.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::generation::{AnswerStream, GenerationBackend, GenerationRequest};
use crate::models::{Answer, ScoredChunk, SourceRef};
use crate::prompt::format_context;
use crate::retriever::Retriever;

/// A streamed answer. `sources` is known before the first fragment arrives.
pub struct StreamingAnswer {
    pub sources: Vec<SourceRef>,
    pub stream: AnswerStream,
}

/// One live pipeline instance, shared by every caller through the
/// lifecycle manager.
pub struct RagPipeline {
    retriever: Retriever,
    backend: Arc<dyn GenerationBackend>,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, backend: Arc<dyn GenerationBackend>) -> Self {
        Self { retriever, backend }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let (chunks, request) = self.prepare(question).await?;
        let answer = self.backend.generate(&request).await?;
        Ok(Answer {
            answer,
            sources: chunks.iter().map(SourceRef::from).collect(),
        })
    }

    pub async fn ask_stream(&self, question: &str) -> Result<StreamingAnswer> {
        let (chunks, request) = self.prepare(question).await?;
        let stream = self.backend.generate_stream(&request).await?;
        Ok(StreamingAnswer {
            sources: chunks.iter().map(SourceRef::from).collect(),
            stream,
        })
    }

    async fn prepare(&self, question: &str) -> Result<(Vec<ScoredChunk>, GenerationRequest)> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidQuestion("question must not be empty".to_string()));
        }

        let chunks = self.retriever.retrieve(question).await?;
        tracing::debug!(
            chunks = chunks.len(),
            backend = self.backend.model_name(),
            "generating answer"
        );
        let request = GenerationRequest {
            context: format_context(&chunks),
            question: question.to_string(),
        };
        Ok((chunks, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_document;
    use crate::config::RetrievalConfig;
    use crate::embedding::HashingProvider;
    use crate::index::{IndexEntry, VectorIndex};
    use crate::models::Document;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use parking_lot::Mutex;

    /// Records the last request and echoes the context back.
    #[derive(Default)]
    struct EchoBackend {
        last: Mutex<Option<GenerationRequest>>,
    }

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            *self.last.lock() = Some(request.clone());
            Ok(format!("answer from: {}", request.context))
        }

        async fn generate_stream(&self, request: &GenerationRequest) -> Result<AnswerStream> {
            let parts = vec![Ok("one ".to_string()), Ok(request.question.clone())];
            Ok(Box::pin(futures_util::stream::iter(parts)))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl GenerationBackend for FailingBackend {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Err(Error::generation("upstream 500"))
        }
        async fn generate_stream(&self, _request: &GenerationRequest) -> Result<AnswerStream> {
            Err(Error::generation("upstream 500"))
        }
    }

    fn retriever() -> Retriever {
        let embedder = HashingProvider::new(64);
        let doc = Document {
            source: "policy.pdf".to_string(),
            page: Some(2),
            content_type: "application/pdf".to_string(),
            text: "Remote work requires manager approval.".to_string(),
        };
        let entries = chunk_document(&doc, 500, 50)
            .into_iter()
            .map(|chunk| IndexEntry {
                vector: embedder.embed_sync(&chunk.text),
                chunk,
            })
            .collect();
        let index = VectorIndex::build("hashing", 64, entries).unwrap();
        Retriever::new(Arc::new(index), Arc::new(embedder), RetrievalConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_ask_passes_context_and_sources() {
        let backend = Arc::new(EchoBackend::default());
        let pipeline = RagPipeline::new(retriever(), backend.clone());

        let answer = pipeline.ask("Does remote work need approval?").await.unwrap();
        assert!(answer.answer.contains("[Source: policy.pdf, page 2]"));
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].page, Some(2));

        let last = backend.last.lock().clone().unwrap();
        assert_eq!(last.question, "Does remote work need approval?");
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let pipeline = RagPipeline::new(retriever(), Arc::new(EchoBackend::default()));
        let err = pipeline.ask("  ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuestion(_)));
    }

    #[tokio::test]
    async fn test_generation_failure_is_distinct() {
        let pipeline = RagPipeline::new(retriever(), Arc::new(FailingBackend));
        let err = pipeline.ask("remote work?").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_ask_stream_yields_fragments() {
        let pipeline = RagPipeline::new(retriever(), Arc::new(EchoBackend::default()));
        let streamed = pipeline.ask_stream("remote work?").await.unwrap();
        assert_eq!(streamed.sources.len(), 1);
        let text: Vec<String> = streamed.stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(text.concat(), "one remote work?");
    }
}
