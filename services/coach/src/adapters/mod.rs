pub mod browser_audio;
pub mod file_store;
pub mod generation_llm;
pub mod voice_ws;

pub use browser_audio::{BrowserAudioInput, BrowserAudioOutput, BrowserCommand};
pub use file_store::FileKeyValueStore;
pub use generation_llm::OpenAiGenerationAdapter;
pub use voice_ws::WsVoiceTransport;
