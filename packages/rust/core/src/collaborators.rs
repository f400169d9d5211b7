//! Capabilities the pipeline consumes but does not implement.
//!
//! Content acquisition, model calls, rendering and transfer all sit behind
//! these traits. Implementations report retryable failures as
//! [`MediaLensError::TransientProvider`](medialens_shared::MediaLensError::TransientProvider)
//! and everything else as
//! [`MediaLensError::FatalProvider`](medialens_shared::MediaLensError::FatalProvider).

use std::sync::Arc;

use async_trait::async_trait;

use medialens_shared::{AnswerSet, Job, JobKey, Result};

/// Content acquisition. Writes raw (and optionally clean) HTML into job directories.
#[async_trait]
pub trait Harvester: Send + Sync {
    /// Full acquisition into a new job directory: raw plus clean content.
    async fn harvest(&self, job: JobKey, job_path: &str, sites: &[String]) -> Result<()>;

    /// Acquire raw content only into a new job directory.
    async fn scrape(&self, job: JobKey, job_path: &str, sites: &[String]) -> Result<()>;

    /// Produce clean HTML from a job's raw HTML.
    async fn clean(&self, job: &Job, sites: &[String]) -> Result<()>;

    /// Re-acquire content into an existing job.
    async fn reharvest(&self, job: &Job, sites: &[String]) -> Result<()>;
}

/// Headline and article extraction from clean HTML.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Write `<site>-clean-extracted.json` and the article files for each site.
    async fn extract(&self, job: &Job, sites: &[String]) -> Result<()>;
}

/// Question answering over site content.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(
        &self,
        site: &str,
        content: &serde_json::Value,
        questions: &[String],
    ) -> Result<AnswerSet>;
}

/// Daily summary across the sites of one job.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `interpretations` are `(site, answers)` in configured site order.
    async fn summarize(&self, job: &Job, interpretations: &[(String, AnswerSet)])
    -> Result<String>;
}

/// Byte-level page rendering.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, template_id: &str, data: &serde_json::Value) -> Result<Vec<u8>>;
}

/// Remote publication of staged pages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<()>;
}

/// One implementation of every capability.
#[derive(Clone)]
pub struct Collaborators {
    pub harvester: Arc<dyn Harvester>,
    pub extractor: Arc<dyn Extractor>,
    pub interpreter: Arc<dyn Interpreter>,
    pub summarizer: Arc<dyn Summarizer>,
    pub renderer: Arc<dyn Renderer>,
    pub publisher: Arc<dyn Publisher>,
}

impl Collaborators {
    /// Use one value for every capability.
    pub fn from_single<T>(all: Arc<T>) -> Self
    where
        T: Harvester + Extractor + Interpreter + Summarizer + Renderer + Publisher + 'static,
    {
        Self {
            harvester: all.clone(),
            extractor: all.clone(),
            interpreter: all.clone(),
            summarizer: all.clone(),
            renderer: all.clone(),
            publisher: all,
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Collaborators that write real artifacts and record every call.

    use std::sync::Mutex;

    use super::*;
    use medialens_shared::{ArtifactKind, MediaLensError, QuestionAnswer};
    use medialens_storage::{Storage, StorageAdapter, StorageAdapterExt, join_path};
    use serde_json::json;

    pub struct FakeCollaborators {
        artifacts: Arc<dyn StorageAdapter>,
        calls: Mutex<Vec<String>>,
        published: Mutex<Vec<(String, Vec<u8>)>>,
        /// Make `extract` fail on this job; `true` for a retryable failure.
        pub fail_extract: Mutex<Option<(JobKey, bool)>>,
        /// Request a stop of this run once the first extract finishes.
        pub stop_after_extract: Mutex<Option<(Arc<Storage>, String)>>,
    }

    impl FakeCollaborators {
        pub fn new(artifacts: Arc<dyn StorageAdapter>) -> Arc<Self> {
            Arc::new(Self {
                artifacts,
                calls: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                fail_extract: Mutex::new(None),
                stop_after_extract: Mutex::new(None),
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// Calls whose name starts with `prefix`.
        pub fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }

        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        async fn write_raw(&self, dir: &str, sites: &[String]) -> Result<()> {
            for site in sites {
                let path = join_path(&[dir, &ArtifactKind::Raw.file_name(site)]);
                self.artifacts.write_text(&path, "<html>raw</html>").await?;
            }
            Ok(())
        }

        async fn write_clean(&self, dir: &str, sites: &[String]) -> Result<()> {
            for site in sites {
                let path = join_path(&[dir, &ArtifactKind::Clean.file_name(site)]);
                self.artifacts.write_text(&path, "<html>clean</html>").await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Harvester for FakeCollaborators {
        async fn harvest(&self, job: JobKey, job_path: &str, sites: &[String]) -> Result<()> {
            self.record(format!("harvest {job}"));
            self.write_raw(job_path, sites).await?;
            self.write_clean(job_path, sites).await
        }

        async fn scrape(&self, job: JobKey, job_path: &str, sites: &[String]) -> Result<()> {
            self.record(format!("scrape {job}"));
            self.write_raw(job_path, sites).await
        }

        async fn clean(&self, job: &Job, sites: &[String]) -> Result<()> {
            self.record(format!("clean {}", job.key));
            self.write_clean(&job.path, sites).await
        }

        async fn reharvest(&self, job: &Job, sites: &[String]) -> Result<()> {
            self.record(format!("reharvest {}", job.key));
            self.write_raw(&job.path, sites).await
        }
    }

    #[async_trait]
    impl Extractor for FakeCollaborators {
        async fn extract(&self, job: &Job, sites: &[String]) -> Result<()> {
            self.record(format!("extract {}", job.key));
            let failure = *self.fail_extract.lock().unwrap();
            if let Some((key, retryable)) = failure {
                if key == job.key {
                    let msg = format!("extraction failed for {key}");
                    return Err(if retryable {
                        MediaLensError::TransientProvider(msg)
                    } else {
                        MediaLensError::FatalProvider(msg)
                    });
                }
            }

            for site in sites {
                let extracted = join_path(&[&job.path, &ArtifactKind::Extracted.file_name(site)]);
                self.artifacts
                    .write_json(
                        &extracted,
                        &json!({"stories": [{"url": "https://x/1"}, {"url": "https://x/2"}]}),
                    )
                    .await?;
                for n in 0..2 {
                    let article = join_path(&[&job.path, &ArtifactKind::Article(n).file_name(site)]);
                    self.artifacts
                        .write_json(&article, &json!({"title": format!("{site} #{n}")}))
                        .await?;
                }
            }

            let stop = self.stop_after_extract.lock().unwrap().take();
            if let Some((state, run_id)) = stop {
                state.request_stop(&run_id).await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Interpreter for FakeCollaborators {
        async fn interpret(
            &self,
            site: &str,
            content: &serde_json::Value,
            questions: &[String],
        ) -> Result<AnswerSet> {
            self.record(format!("interpret {site}"));
            let items = content.as_array().map_or(0, Vec::len);
            Ok(questions
                .iter()
                .map(|q| QuestionAnswer {
                    question: q.clone(),
                    answer: format!("{site}: {items} items"),
                })
                .collect())
        }
    }

    #[async_trait]
    impl Summarizer for FakeCollaborators {
        async fn summarize(
            &self,
            job: &Job,
            interpretations: &[(String, AnswerSet)],
        ) -> Result<String> {
            self.record(format!("summarize {}", job.key));
            Ok(interpretations
                .iter()
                .map(|(site, answers)| {
                    let first = answers.first().map_or("", |a| a.answer.as_str());
                    format!("{site}: {first}")
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    #[async_trait]
    impl Renderer for FakeCollaborators {
        async fn render(&self, template_id: &str, data: &serde_json::Value) -> Result<Vec<u8>> {
            self.record(format!("render {template_id}"));
            serde_json::to_vec(&json!({"template": template_id, "data": data}))
                .map_err(|e| MediaLensError::FatalProvider(e.to_string()))
        }
    }

    #[async_trait]
    impl Publisher for FakeCollaborators {
        async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<()> {
            self.record(format!("put {path}"));
            self.published
                .lock()
                .unwrap()
                .push((path.to_string(), bytes.to_vec()));
            Ok(())
        }
    }
}
