//! Simple test client for a running MemOSD daemon

use memosd_client::OsdClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:6802".to_string());

    println!("Connecting to OSD at {endpoint}...");
    let mut client = OsdClient::connect(endpoint.parse()?, 1).await?;

    // Test 1: Write an object
    println!("\n--- Write ---");
    let name = b"test-client-object";
    let payload = b"Hello from the MemOSD test client!";
    client.write(name, 0, payload).await?;
    println!("Wrote {} bytes", payload.len());

    // Test 2: Read it back
    println!("\n--- Read ---");
    let data = client.read(name, 0, payload.len() as u64).await?;
    println!("Read {} bytes", data.len());
    println!("Data matches: {}", data == payload);
    println!("Content: {}", String::from_utf8_lossy(&data));

    // Test 3: Stat
    println!("\n--- Stat ---");
    let (size, mtime) = client.stat(name).await?;
    println!("Size: {size} bytes");
    println!("Mtime: {mtime}");

    // Test 4: Sparse read past a hole
    println!("\n--- Sparse read ---");
    client.write(name, 1 << 20, b"tail").await?;
    let (size, _) = client.stat(name).await?;
    println!("Size after sparse write: {size} bytes");
    let hole = client.read(name, 4096, 64).await?;
    println!(
        "Hole reads as zeros: {}",
        hole.iter().all(|&b| b == 0)
    );

    println!("\n=== All tests passed! ===");

    Ok(())
}
