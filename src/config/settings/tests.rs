use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn test_config() -> Config {
    Config::with_base_dir("/tmp/course-rag-test")
}

#[test]
fn default_config() {
    let config = test_config();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text:latest");
    assert_eq!(config.ollama.batch_size, 16);
    assert_eq!(config.chunking.max_chunk_size, 800);
    assert_eq!(config.chunking.overlap_size, 100);
    assert_eq!(config.retrieval.max_results, 5);
    assert_eq!(config.conversation.max_history_turns, 4);
}

#[test]
fn config_validation() {
    let config = test_config();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.chat_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.max_results = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.conversation.max_tool_rounds = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.retrieval.min_relevance = 1.5;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidThreshold("min_relevance", _))
    ));
}

#[test]
fn chunking_relationships_are_validated() {
    let mut config = test_config();
    config.chunking.min_chunk_size = config.chunking.max_chunk_size;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidMinChunkSize(_, _))
    ));

    let mut config = test_config();
    config.chunking.overlap_size = config.chunking.max_chunk_size / 2;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidOverlapSize(_, _))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = test_config();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = test_config();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config =
        toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_config_uses_defaults() {
    let partial_toml = r#"
        [ollama]
        host = "gpu-box"

        [conversation]
        max_tool_rounds = 5
    "#;

    let config: Config = toml::from_str(partial_toml).expect("should parse partial toml");
    assert_eq!(config.ollama.host, "gpu-box");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.conversation.max_tool_rounds, 5);
    assert_eq!(config.conversation.max_history_turns, 4);
    assert_eq!(config.chunking, ChunkingConfig::default());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.ollama.chat_model = "qwen2.5:7b".to_string();
    config.retrieval.max_results = 8;

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded, config);
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[ollama]\nbatch_size = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn default_dir_honours_environment_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::set_var(HOME_ENV_VAR, temp_dir.path()) };
    let dir = Config::default_dir().expect("should resolve directory");
    // SAFETY: serialized with the other environment-mutating tests
    unsafe { std::env::remove_var(HOME_ENV_VAR) };

    assert_eq!(dir, temp_dir.path());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_embedding_model("new-model".to_string()).is_ok());
    assert!(config.set_chat_model("chat-model".to_string()).is_ok());
    assert!(config.set_batch_size(64).is_ok());
    assert!(config.set_embedding_dimension(1024).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_embedding_model("   ".to_string()).is_err());
    assert!(config.set_chat_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_embedding_dimension(1).is_err());

    assert_eq!(config.protocol, "https");
    assert_eq!(config.port, 8080);
    assert_eq!(config.embedding_dimension, 1024);
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidProtocol("ftp".to_string()),
        ConfigError::InvalidPort(0),
        ConfigError::InvalidBatchSize(0),
        ConfigError::InvalidModel(String::new()),
        ConfigError::InvalidUrl("invalid-url".to_string()),
        ConfigError::InvalidToolRounds(0),
        ConfigError::InvalidSessionLimit(0),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}

#[test]
fn session_limit_is_validated() {
    let mut config = Config::with_base_dir("unused");
    assert_eq!(config.conversation.max_sessions, 1000);
    assert!(config.validate().is_ok());

    config.conversation.max_sessions = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidSessionLimit(0))
    ));
    assert!(config.sessions_path().ends_with("sessions"));
}
