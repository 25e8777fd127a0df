#![no_main]

use libfuzzer_sys::fuzz_target;
use mssql_connector::secret::Secret;

fuzz_target!(|data: &[u8]| {
    // Fuzz the facade's connection-string grammar (superset of mssql_client::Config's:
    // adds Catalog/azure_secret/azure_tenant keys and the TrustServerCertificate wiring).
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = Secret::from_connection_string(s);
    }
});
