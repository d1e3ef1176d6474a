mod article;
mod batch;
mod stage;
mod topic;

pub use article::{Article, InsertOutcome, NewArticle};
pub use batch::{
    BatchJob, BatchRequestLine, BatchResultLine, BatchState, BatchStatus, ChatMessage,
    ChatRequest, ItemOutcome,
};
pub use stage::{
    error_status, ColumnType, FieldValue, Stage, StageColumn, StageUpdate, MIN_SCRAPED_CHARS,
    OUTLIER_CLUSTER, STATUS_INVALID_URL, STATUS_NO_CONTENT, STATUS_SUCCESS,
};
pub use topic::{load_topics, save_topics, topic_name, TopicInfo, TopicMap};
