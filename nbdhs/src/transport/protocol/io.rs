use byteorder::{BigEndian as BE, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt};
use std::io::Result;
use tracing::trace;

// All of these either fill the whole buffer or fail with UnexpectedEof.
// The stream position after a failure is unspecified.

pub async fn read_bytes<R: AsyncRead + Unpin>(r: &mut R, length: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; length];
    r.read_exact(&mut buf).await?;
    trace!(length, "read");
    Ok(buf)
}
pub async fn read_array<R: AsyncRead + Unpin, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0; N];
    r.read_exact(&mut buf).await?;
    trace!(length = N, "read");
    Ok(buf)
}
pub async fn read_u16<R: AsyncRead + Unpin>(r: &mut R) -> Result<u16> {
    let buf = read_array::<_, 2>(r).await?;
    Ok(BE::read_u16(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[tokio::test]
    async fn exact_read_advances_by_length() {
        let mut c: &[u8] = b"NBDMAGICrest";
        let got = read_bytes(&mut c, 8).await.unwrap();
        assert_eq!(got, b"NBDMAGIC");
        assert_eq!(c, b"rest");
    }

    #[tokio::test]
    async fn zero_length_consumes_nothing() {
        let mut c: &[u8] = b"abc";
        let got = read_bytes(&mut c, 0).await.unwrap();
        assert!(got.is_empty());
        assert_eq!(c.len(), 3);
    }

    #[tokio::test]
    async fn short_stream_is_an_error() {
        let mut c: &[u8] = b"NBDM";
        let err = read_array::<_, 8>(&mut c).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn u16_is_big_endian() {
        let mut c: &[u8] = &[0x00, 0x03, 0xff];
        assert_eq!(read_u16(&mut c).await.unwrap(), 3);
        assert_eq!(c, &[0xff]);
    }

    #[tokio::test]
    async fn reads_across_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in [&b"NBD"[..], &b"MAG"[..], &b"IC"[..]] {
                server.write_all(chunk).await.unwrap();
            }
            server
        });
        let got = read_array::<_, 8>(&mut client).await.unwrap();
        assert_eq!(&got, b"NBDMAGIC");
        drop(writer.await.unwrap());
    }
}
