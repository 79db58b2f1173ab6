//! AI 模块：残局库（逆向分析）、极小化极大搜索、难度策略、后台计算与走法提示。

pub mod hints;
pub mod minimax;
pub mod offload;
pub mod policy;
pub mod store;
pub mod tablebase;

pub use hints::analyze_moves;
pub use minimax::{HeuristicWeights, SearchEngine, SearchResult};
pub use offload::{
    OffloadAction, OffloadBody, OffloadError, OffloadJob, OffloadRequest, OffloadResponse,
    OffloadResult, OffloadTicket, SearchOffload, SearchPayload,
};
pub use policy::{
    AiAgent, AiConfig, AiDecision, AiDifficulty, ClassificationSource, Classifier,
    MoveClassification, StrengthPolicy,
};
pub use store::{StoreError, TablebaseStore};
pub use tablebase::{
    InvariantViolation, Outcome, Tablebase, TablebaseBuilder, TablebaseEntry, TablebaseSummary,
};
