//! Index lookup processor.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, warn};

use crate::env::StorageEnv;
use crate::error::ErrorCode;
use crate::plan::{result_columns, LookupPlanBuilder, PlanContext, StoragePlan};
use crate::processor::BaseProcessor;
use crate::types::{DataSet, LookupIndexRequest, LookupIndexResponse, PartitionId, Row};

/// Runs one lookup plan per requested partition and merges their rows.
pub struct LookupProcessor {
    env: StorageEnv,
}

impl LookupProcessor {
    pub fn new(env: StorageEnv) -> Self {
        Self { env }
    }

    pub async fn process(self, req: LookupIndexRequest) -> LookupIndexResponse {
        let space_id = req.space_id;
        let parts: Vec<PartitionId> = req.parts.clone();
        let base = BaseProcessor::new(self.env.clone(), space_id, parts.len());
        // The header is fixed before anything can fail.
        let mut data = DataSet::with_columns(result_columns(
            req.indices.is_edge,
            &req.return_columns,
        ));

        let plan = match self.check_and_build(&req) {
            Ok(plan) => plan,
            Err(code) => {
                for part in &parts {
                    base.handle_error_code(*part, code);
                }
                let mut result = base.finish().await;
                result.request_code = Some(code);
                return LookupIndexResponse { result, data };
            }
        };

        let collected: Arc<Mutex<BTreeMap<PartitionId, Vec<Row>>>> =
            Arc::new(Mutex::new(BTreeMap::new()));
        for part in parts {
            let mut plan = plan.clone();
            let tracker = base.tracker();
            let collected = collected.clone();
            tokio::spawn(async move {
                let outcome = tokio::task::spawn_blocking(move || {
                    plan.go(part).map(|_| plan.into_data().rows)
                })
                .await;
                let code = match outcome {
                    Ok(Ok(rows)) => {
                        collected
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(part, rows);
                        ErrorCode::Succeeded
                    }
                    Ok(Err(code)) => code,
                    Err(err) => {
                        error!(space = space_id, part, error = %err, "lookup plan task failed");
                        ErrorCode::Unknown
                    }
                };
                tracker.complete(part, code);
            });
        }

        let result = base.finish().await;
        let per_part =
            std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
        data.rows = per_part.into_values().flatten().collect();
        let max_rows = self.env.config.lookup_max_rows;
        if max_rows > 0 && data.rows.len() > max_rows {
            warn!(
                space = space_id,
                rows = data.rows.len(),
                max_rows,
                "lookup result truncated"
            );
            data.rows.truncate(max_rows);
        }
        LookupIndexResponse { result, data }
    }

    fn check_and_build(&self, req: &LookupIndexRequest) -> Result<StoragePlan, ErrorCode> {
        let space_id = req.space_id;
        let vid_len = self.env.schemas.space_vid_len(space_id).map_err(|err| {
            warn!(space = space_id, error = %err, "failed to resolve vid length");
            ErrorCode::InvalidSpaceVidLen
        })?;
        if req.indices.contexts.is_empty() {
            return Err(ErrorCode::InvalidOperation);
        }
        let ctx = Arc::new(PlanContext {
            env: self.env.clone(),
            space_id,
            vid_len,
            is_edge: req.indices.is_edge,
            schema_id: req.indices.tag_or_edge_id,
        });
        LookupPlanBuilder::new(ctx, &req.indices.contexts, &req.return_columns).build()
    }
}
