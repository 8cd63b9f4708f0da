pub mod fake_servers;
