use dft_client::{Client, ClientError, Result};
use dft_core::MetaEntry;
use std::io::Write;

pub async fn put(address: &str, key: &str, data: &[u8]) -> Result<()> {
    let mut client = Client::connect(address).await?;
    match client.put(key, data).await {
        Err(ClientError::NotLeader { hint: Some(hint) }) => {
            let mut client = Client::connect(&hint).await?;
            client.put(key, data).await
        }
        other => other,
    }?;
    println!("stored {key} ({} bytes)", data.len());
    Ok(())
}

pub async fn get(address: &str, key: &str) -> Result<()> {
    let mut client = Client::connect(address).await?;
    let data = client.get(key).await?;
    std::io::stdout()
        .write_all(&data)
        .map_err(ClientError::Io)?;
    Ok(())
}

pub async fn delete(address: &str, key: &str) -> Result<()> {
    let mut client = Client::connect(address).await?;
    match client.delete(key).await {
        Err(ClientError::NotLeader { hint: Some(hint) }) => {
            let mut client = Client::connect(&hint).await?;
            client.delete(key).await
        }
        other => other,
    }?;
    println!("deleted {key}");
    Ok(())
}

pub async fn meta(address: &str, path: &str) -> Result<()> {
    let mut client = Client::connect(address).await?;
    let entry = client.metadata(path).await?;
    print_meta(&entry);
    Ok(())
}

pub async fn add_peer(address: &str, id: &str, peer_addr: &str) -> Result<()> {
    let mut client = Client::connect(address).await?;
    client.add_peer(id, peer_addr).await?;
    println!("added {id} at {peer_addr}");
    Ok(())
}

pub async fn remove_peer(address: &str, id: &str) -> Result<()> {
    let mut client = Client::connect(address).await?;
    client.remove_peer(id).await?;
    println!("removed {id}");
    Ok(())
}

/// Replays every pair reported by `source` through the cluster at `address`.
pub async fn restore(address: &str, source: &str) -> Result<()> {
    let mut from = Client::connect(source).await?;
    let pairs = from.report().await?;

    let mut to = Client::connect(address).await?;
    let mut restored = 0usize;
    for (key, data) in &pairs {
        let Ok(key) = std::str::from_utf8(key) else {
            continue;
        };
        match to.put(key, data).await {
            Ok(()) => restored += 1,
            Err(ClientError::NotLeader { hint: Some(hint) }) => {
                to = Client::connect(&hint).await?;
                to.put(key, data).await?;
                restored += 1;
            }
            Err(err) => return Err(err),
        }
    }
    println!("restored {restored} of {} keys from {source}", pairs.len());
    Ok(())
}

fn print_meta(entry: &MetaEntry) {
    println!("path:     {}", entry.path);
    println!("version:  {}", entry.version);
    let mut hash = String::with_capacity(entry.hash.len() * 2);
    for byte in entry.hash {
        hash.push_str(&format!("{byte:02x}"));
    }
    println!("hash:     {hash}");
    println!("replicas: {:?}", entry.replicas);
    println!("deleted:  {}", entry.deleted);
}
