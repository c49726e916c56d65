use index::vector_store::cosine_similarity;
use index::{CommunityReport, Embedder, GraphStore};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::QueryLlm;
use crate::{CommunityRef, QueryError, QueryTrace};

/// Global retrieval over community reports.
pub struct GlobalSearchEngine {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    llm: QueryLlm,
}

impl GlobalSearchEngine {
    pub fn new(graph: Arc<dyn GraphStore>, embedder: Arc<dyn Embedder>, llm: QueryLlm) -> Self {
        Self {
            graph,
            embedder,
            llm,
        }
    }

    pub async fn search(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<(String, QueryTrace), QueryError> {
        let reports = self.graph.community_reports().await?;
        if reports.is_empty() {
            return Err(QueryError::NoCommunityReports);
        }

        let question_embedding = self.embedder.embed(question).await?;
        let mut scored: Vec<(CommunityReport, f32)> = Vec::with_capacity(reports.len());
        for report in reports {
            let embedding = self.embedder.embed(&report.to_text()).await?;
            let score = cosine_similarity(&question_embedding, &embedding);
            scored.push((report, score));
        }

        // highest similarity first, rating breaks ties
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| b.rating.total_cmp(&a.rating))
                .then_with(|| a.id.cmp(&b.id))
        });
        let searched = scored.len();
        scored.truncate(top_k.max(1));
        tracing::debug!(searched, used = scored.len(), "ranked community reports");

        let context = build_global_context(&scored);
        let answer = self.llm.synthesize(question, &context).await?;

        Ok((
            answer,
            QueryTrace {
                communities: scored
                    .iter()
                    .map(|(report, score)| CommunityRef {
                        id: report.id,
                        title: report.title.clone(),
                        score: *score,
                    })
                    .collect(),
                context_size: context.len(),
                ..Default::default()
            },
        ))
    }
}

fn build_global_context(scored: &[(CommunityReport, f32)]) -> String {
    let mut context = String::new();
    for (i, (report, score)) in scored.iter().enumerate() {
        let _ = writeln!(
            context,
            "Community {} (relevance {:.2}, rating {:.1}): {}\n{}\nMembers: {}\n",
            i + 1,
            score,
            report.rating,
            report.title,
            report.summary,
            report.members.join(", ")
        );
    }
    context
}
