pub mod http_client_factory;
