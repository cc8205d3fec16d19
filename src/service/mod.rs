pub mod conversation_service;
