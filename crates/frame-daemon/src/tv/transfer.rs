//! One-shot data socket used to push image bytes after `ready_to_use`.

use frame_proto::protocol::{ConnInfo, ImageFormat, UploadHeader};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::samsung::insecure_tls;
use super::TvError;

pub(super) async fn push_image(
    info: &ConnInfo,
    format: ImageFormat,
    image: &[u8],
    limit: Duration,
) -> Result<(), TvError> {
    let header = UploadHeader::new(info, format, image.len()).encode()?;
    tokio::time::timeout(limit, connect_and_write(info, &header, image))
        .await
        .map_err(|_| TvError::Timeout("image transfer"))?
}

async fn connect_and_write(info: &ConnInfo, header: &[u8], image: &[u8]) -> Result<(), TvError> {
    let tcp = TcpStream::connect((info.ip.as_str(), info.port)).await?;
    tcp.set_nodelay(true)?;

    if info.secured {
        let tls = tokio_native_tls::TlsConnector::from(insecure_tls()?);
        let mut stream = tls
            .connect(&info.ip, tcp)
            .await
            .map_err(|e| TvError::Connect(format!("data socket tls: {}", e)))?;
        write_payload(&mut stream, header, image).await
    } else {
        let mut stream = tcp;
        write_payload(&mut stream, header, image).await
    }
}

async fn write_payload<S>(stream: &mut S, header: &[u8], image: &[u8]) -> Result<(), TvError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(header).await?;
    stream.write_all(image).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    debug!("tv: data socket wrote {} + {} bytes", header.len(), image.len());
    Ok(())
}
