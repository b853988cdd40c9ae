//! Route path constants, shared by the router and its tests.

pub mod v1 {
    pub const COMPILE: &str = "/api/v1/compile";
    pub const COMPILE_STREAM: &str = "/api/v1/compile/stream";
    pub const COMPILE_BATCH: &str = "/api/v1/compile/batch";
    pub const QUEUE_COMPILE: &str = "/api/v1/queue/compile";
    pub const QUEUE_RESULTS: &str = "/api/v1/queue/results";
    pub const QUEUE_RESULT: &str = "/api/v1/queue/results/{request_id}";
    pub const HEALTH: &str = "/api/v1/health";
    pub const METRICS: &str = "/api/v1/metrics";
    pub const SOURCES_HEALTH: &str = "/api/v1/sources/health";
    pub const WEBSOCKET: &str = "/api/v1/ws";
}
