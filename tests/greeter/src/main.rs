use anyhow::Context;
use byteorder::{BigEndian as BE, ByteOrder};
use clap::Parser;
use nbdhs::transport::protocol::consts::*;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

// Throwaway server for poking nbdhsctl by hand. It only sends the greeting.
#[derive(Parser)]
struct Opts {
    #[arg(long, default_value = "127.0.0.1:10809")]
    listen: String,
    #[arg(long, default_value_t = NBD_FLAG_FIXED_NEWSTYLE | NBD_FLAG_NO_ZEROES)]
    flags: u16,
    /// Send the oldstyle cliserv magic instead of IHAVEOPT
    #[arg(long)]
    oldstyle: bool,
    /// Stop after this many greeting bytes
    #[arg(long)]
    truncate: Option<usize>,
}

fn greeting(opts: &Opts) -> Vec<u8> {
    let mut buf = vec![0; 18];
    buf[..8].copy_from_slice(NBD_MAGIC);
    if opts.oldstyle {
        BE::write_u64(&mut buf[8..16], NBD_CLISERV_MAGIC);
    } else {
        buf[8..16].copy_from_slice(NBD_IHAVEOPT);
    }
    BE::write_u16(&mut buf[16..], opts.flags);
    if let Some(n) = opts.truncate {
        buf.truncate(n);
    }
    buf
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let listener = TcpListener::bind(&opts.listen).await.with_context(|| format!("couldn't bind {}", opts.listen))?;
    let greeting = greeting(&opts);
    loop {
        let (mut stream, peer) = listener.accept().await?;
        println!("greeting {}", peer);
        let greeting = greeting.clone();
        tokio::spawn(async move {
            let _ = stream.write_all(&greeting).await;
            let _ = stream.flush().await;
        });
    }
}
