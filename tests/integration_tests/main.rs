mod setup;
mod test_exporter;
mod test_server;
